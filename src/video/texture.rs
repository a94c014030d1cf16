//! Texture and palette resources
//!
//! Pixel decode runs on the worker pool; every query passes through the
//! blocking `assure` gate, so readers never observe a half-loaded resource.
//! GPU upload happens on the render thread at first bind (see `Gfx`), which
//! is why the resource itself only ever holds decoded pixels.

use std::path::PathBuf;
use std::sync::Mutex;

use macroquad::prelude::Vec2;

use crate::assets::{AsyncOp, WorkerPool};

/// Decoded RGBA8 pixels ready for upload
pub struct DecodedImage {
    pub width: u16,
    pub height: u16,
    pub pixels: Vec<u8>,
}

enum TexState {
    Empty,
    Pending(AsyncOp<Option<DecodedImage>>),
    /// Decode finished; `None` means it failed and the resource degrades
    /// to the renderer's fallback.
    Ready(Option<DecodedImage>),
    /// Pixels handed to the GPU cache; only the dimensions remain.
    Uploaded { width: u16, height: u16 },
}

pub struct Texture {
    id: u64,
    name: String,
    state: Mutex<TexState>,
}

impl Texture {
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            state: Mutex::new(TexState::Empty),
        }
    }

    /// Draw-order identity assigned by the resource context
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dispatch the background decode. A second load is logged and ignored.
    pub fn begin_load(&self, workers: &WorkerPool, path: PathBuf) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if !matches!(*state, TexState::Empty) {
            println!("Warning! Tried to overwrite texture \"{}\"!", self.name);
            return;
        }
        let name = self.name.clone();
        *state = TexState::Pending(workers.submit(move || decode_image(&path, &name)));
    }

    fn assure_locked(state: &mut TexState) {
        if matches!(*state, TexState::Pending(_)) {
            if let TexState::Pending(op) = std::mem::replace(state, TexState::Ready(None)) {
                *state = TexState::Ready(op.wait().flatten());
            }
        }
    }

    /// Pixel dimensions, blocking on an outstanding decode. Zero when the
    /// load failed or never started.
    pub fn dimensions(&self) -> Vec2 {
        let Ok(mut state) = self.state.lock() else {
            return Vec2::ZERO;
        };
        Self::assure_locked(&mut state);
        match &*state {
            TexState::Ready(Some(image)) => Vec2::new(image.width as f32, image.height as f32),
            TexState::Uploaded { width, height } => Vec2::new(*width as f32, *height as f32),
            _ => Vec2::ZERO,
        }
    }

    /// Hand the decoded pixels to the GPU cache exactly once. Later calls
    /// (and failed loads) return `None`.
    pub fn take_pixels(&self) -> Option<DecodedImage> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        Self::assure_locked(&mut state);
        match std::mem::replace(&mut *state, TexState::Empty) {
            TexState::Ready(Some(image)) => {
                *state = TexState::Uploaded {
                    width: image.width,
                    height: image.height,
                };
                Some(image)
            }
            other => {
                *state = other;
                None
            }
        }
    }
}

/// Palette resource: a texture whose rows are color tables. A sprite's
/// logical table index is converted into a normalized row offset through
/// the palette height.
pub struct Palette {
    texture: Texture,
}

impl Palette {
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            texture: Texture::new(id, name),
        }
    }

    pub fn id(&self) -> u64 {
        self.texture.id()
    }

    pub fn texture(&self) -> &Texture {
        &self.texture
    }

    pub fn begin_load(&self, workers: &WorkerPool, path: PathBuf) {
        self.texture.begin_load(workers, path);
    }

    /// Normalize a logical row index into texture space; 0 when the palette
    /// is missing or empty.
    pub fn convert(&self, index: f32) -> f32 {
        let height = self.texture.dimensions().y;
        if height > 0.0 {
            index / height
        } else {
            0.0
        }
    }
}

fn decode_image(path: &std::path::Path, name: &str) -> Option<DecodedImage> {
    match image::open(path) {
        Ok(decoded) => {
            let rgba = decoded.to_rgba8();
            let (width, height) = rgba.dimensions();
            Some(DecodedImage {
                width: width as u16,
                height: height as u16,
                pixels: rgba.into_raw(),
            })
        }
        Err(e) => {
            println!("Failed to decode image \"{name}\" from {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(dir: &std::path::Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        let image = image::RgbaImage::from_pixel(width, height, image::Rgba([1, 2, 3, 255]));
        image.save(&path).unwrap();
        path
    }

    #[test]
    fn test_background_decode_and_assure() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "hero.png", 8, 4);
        let workers = WorkerPool::new(1);
        let texture = Texture::new(1, "hero");
        texture.begin_load(&workers, path);
        // dimensions() blocks until the decode lands
        assert_eq!(texture.dimensions(), Vec2::new(8.0, 4.0));
        let pixels = texture.take_pixels().unwrap();
        assert_eq!(pixels.pixels.len(), 8 * 4 * 4);
        // Pixels are handed over exactly once; dimensions survive.
        assert!(texture.take_pixels().is_none());
        assert_eq!(texture.dimensions(), Vec2::new(8.0, 4.0));
    }

    #[test]
    fn test_missing_file_degrades_to_zero() {
        let workers = WorkerPool::new(1);
        let texture = Texture::new(1, "ghost");
        texture.begin_load(&workers, PathBuf::from("/nowhere/ghost.png"));
        assert_eq!(texture.dimensions(), Vec2::ZERO);
        assert!(texture.take_pixels().is_none());
    }

    #[test]
    fn test_second_load_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_png(dir.path(), "one.png", 2, 2);
        let second = write_png(dir.path(), "two.png", 16, 16);
        let workers = WorkerPool::new(1);
        let texture = Texture::new(1, "one");
        texture.begin_load(&workers, first);
        texture.begin_load(&workers, second);
        assert_eq!(texture.dimensions(), Vec2::new(2.0, 2.0));
    }

    #[test]
    fn test_palette_convert_uses_height() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "shades.png", 16, 4);
        let workers = WorkerPool::new(1);
        let palette = Palette::new(2, "shades");
        palette.begin_load(&workers, path);
        assert_eq!(palette.convert(1.0), 0.25);
        assert_eq!(palette.convert(0.0), 0.0);
    }

    #[test]
    fn test_empty_palette_converts_to_zero() {
        let palette = Palette::new(3, "missing");
        assert_eq!(palette.convert(5.0), 0.0);
    }
}
