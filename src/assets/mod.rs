//! Resource context
//!
//! Explicitly constructed resource store shared by every subsystem that
//! looks up textures, palettes, animations, script sources, or localized
//! text. Maps are guarded by a mutex for insertion/lookup only; decode and
//! parse work runs on the worker pool outside the lock.

mod worker;

pub use worker::{AsyncOp, WorkerPool};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::script::Loading;
use crate::video::{Animation, Palette, Texture};

/// Number of background decode threads
const WORKERS: usize = 2;

struct Store {
    root: PathBuf,
    workers: WorkerPool,
    next_id: AtomicU64,
    textures: Mutex<HashMap<String, Arc<Texture>>>,
    palettes: Mutex<HashMap<String, Arc<Palette>>>,
    animations: Mutex<HashMap<String, Arc<Animation>>>,
    locale: Mutex<HashMap<String, Vec<String>>>,
}

/// Shared handle to the resource store. Cheap to clone; worker threads hold
/// clones so animation loads can resolve their material references.
#[derive(Clone)]
pub struct ResourceContext {
    inner: Arc<Store>,
}

impl ResourceContext {
    /// Mount a data directory. Fails (with a log line) when the directory
    /// does not exist.
    pub fn mount(directory: impl Into<PathBuf>) -> Option<Self> {
        let root = directory.into();
        if !root.is_dir() {
            println!("Couldn't mount data directory at \"{}\"!", root.display());
            return None;
        }
        let context = Self {
            inner: Arc::new(Store {
                root,
                workers: WorkerPool::new(WORKERS),
                next_id: AtomicU64::new(1),
                textures: Mutex::new(HashMap::new()),
                palettes: Mutex::new(HashMap::new()),
                animations: Mutex::new(HashMap::new()),
                locale: Mutex::new(HashMap::new()),
            }),
        };
        println!("Mounted data directory at \"{}\".", context.inner.root.display());
        Some(context)
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Hand out draw-order identities for textures/palettes/animations.
    /// Zero is reserved for "no resource attached".
    pub fn assign_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.inner.workers
    }

    /// Look up a texture by name, starting its background decode on a miss
    pub fn texture(&self, name: &str) -> Arc<Texture> {
        if let Ok(map) = self.inner.textures.lock() {
            if let Some(texture) = map.get(name) {
                return texture.clone();
            }
        }
        let path = self.inner.root.join("images").join(format!("{name}.png"));
        let texture = Arc::new(Texture::new(self.assign_id(), name));
        texture.begin_load(&self.inner.workers, path);
        if let Ok(mut map) = self.inner.textures.lock() {
            // Another thread may have raced the insert; keep the first one.
            return map.entry(name.to_string()).or_insert(texture).clone();
        }
        texture
    }

    /// Look up a palette by name, starting its background decode on a miss
    pub fn palette(&self, name: &str) -> Arc<Palette> {
        if let Ok(map) = self.inner.palettes.lock() {
            if let Some(palette) = map.get(name) {
                return palette.clone();
            }
        }
        let path = self.inner.root.join("palettes").join(format!("{name}.png"));
        let palette = Arc::new(Palette::new(self.assign_id(), name));
        palette.begin_load(&self.inner.workers, path);
        if let Ok(mut map) = self.inner.palettes.lock() {
            return map.entry(name.to_string()).or_insert(palette).clone();
        }
        palette
    }

    /// Look up an animation by name, starting its background load on a miss
    pub fn animation(&self, name: &str) -> Arc<Animation> {
        if let Ok(map) = self.inner.animations.lock() {
            if let Some(animation) = map.get(name) {
                return animation.clone();
            }
        }
        let path = self.inner.root.join("sprites").join(format!("{name}.ron"));
        let animation = Arc::new(Animation::new(self.assign_id()));
        animation.load_async(path, self);
        if let Ok(mut map) = self.inner.animations.lock() {
            return map.entry(name.to_string()).or_insert(animation).clone();
        }
        animation
    }

    /// Resolve a script module's source file. Privileged/global modules live
    /// under `init/`, everything else under `events/`.
    pub fn script_path(&self, name: &str, flags: Loading) -> PathBuf {
        let directory = match flags {
            Loading::Global => "init",
            Loading::Normal | Loading::Import => "events",
        };
        self.inner.root.join(directory).join(format!("{name}.lua"))
    }

    /// Read a script module's source text
    pub fn script_source(&self, name: &str, flags: Loading) -> std::io::Result<String> {
        std::fs::read_to_string(self.script_path(name, flags))
    }

    /// Directory for save/checkpoint files, created on demand
    pub fn save_path(&self) -> PathBuf {
        let path = self.inner.root.join("save");
        if !path.is_dir() {
            let _ = std::fs::create_dir_all(&path);
        }
        path
    }

    /// Swap the localized string table to another language.
    /// Returns false (keeping the old table) when the file is missing or bad.
    pub fn try_language(&self, language: &str) -> bool {
        let path = self.inner.root.join("text").join(format!("{language}.ron"));
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                println!("Couldn't read language file \"{}\": {e}", path.display());
                return false;
            }
        };
        match ron::from_str::<HashMap<String, Vec<String>>>(&source) {
            Ok(table) => {
                if let Ok(mut locale) = self.inner.locale.lock() {
                    *locale = table;
                }
                true
            }
            Err(e) => {
                println!("Couldn't parse language file \"{}\": {e}", path.display());
                false
            }
        }
    }

    /// Localized string lookup; missing entries come back empty
    pub fn locale_find(&self, key: &str, index: usize) -> String {
        if let Ok(locale) = self.inner.locale.lock() {
            if let Some(lines) = locale.get(key) {
                if let Some(line) = lines.get(index) {
                    return line.clone();
                }
            }
        }
        String::new()
    }

    pub fn locale_size(&self, key: &str) -> usize {
        if let Ok(locale) = self.inner.locale.lock() {
            if let Some(lines) = locale.get(key) {
                return lines.len();
            }
        }
        0
    }
}
