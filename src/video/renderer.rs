//! Renderer / display-list registry
//!
//! Looks up or creates display lists by their six-field material key and
//! flushes them in key order every frame. Two pools exist: world-space
//! "normal" lists drawn under the camera projection and screen-space
//! "overlay" lists drawn under a fixed ortho projection. Captured lists
//! bypass key matching until released.

use std::sync::Arc;

use macroquad::prelude::Mat4;

use super::display_list::DisplayList;
use super::gfx::Gfx;
use super::texture::{Palette, Texture};
use super::types::{BlendMode, BufferUsage, DisplayKey, Layer, Program};
use crate::util::Rect;

/// Virtual screen resolution; the window scales this up
pub const SCREEN_WIDTH: f32 = 320.0;
pub const SCREEN_HEIGHT: f32 = 180.0;

pub struct Renderer {
    normal: Vec<DisplayList>,
    overlay: Vec<DisplayList>,
    viewport: Rect,
    panic: bool,
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            normal: Vec::new(),
            overlay: Vec::new(),
            viewport: Rect::new(0.0, 0.0, SCREEN_WIDTH, SCREEN_HEIGHT),
            panic: false,
        }
    }

    /// Camera rect used for the world-space projection and for culling
    pub fn set_viewport(&mut self, viewport: Rect) {
        self.viewport = viewport;
    }

    pub fn viewport(&self) -> Rect {
        self.viewport
    }

    /// Force-redraw-everything flag, raised when lists are recycled
    pub fn panicked(&self) -> bool {
        self.panic
    }

    fn key(
        layer: Layer,
        blend_mode: BlendMode,
        usage: BufferUsage,
        program: Program,
        texture: Option<&Arc<Texture>>,
        palette: Option<&Arc<Palette>>,
    ) -> DisplayKey {
        DisplayKey {
            layer,
            blend_mode,
            usage,
            texture: texture.map(|t| t.id()).unwrap_or(0),
            palette: palette.map(|p| p.id()).unwrap_or(0),
            program,
        }
    }

    fn fetch<'a>(
        lists: &'a mut Vec<DisplayList>,
        key: DisplayKey,
        texture: Option<&Arc<Texture>>,
        palette: Option<&Arc<Palette>>,
    ) -> &'a mut DisplayList {
        if let Some(index) = lists
            .iter()
            .position(|list| !list.persists() && list.matches_key(&key))
        {
            return &mut lists[index];
        }
        let index = lists.partition_point(|list| *list.key() < key);
        lists.insert(
            index,
            DisplayList::new(key, texture.cloned(), palette.cloned()),
        );
        &mut lists[index]
    }

    /// Fetch-or-create a world-space list for the given material key
    pub fn get_normal_quads(
        &mut self,
        layer: Layer,
        blend_mode: BlendMode,
        usage: BufferUsage,
        program: Program,
        texture: Option<&Arc<Texture>>,
        palette: Option<&Arc<Palette>>,
    ) -> &mut DisplayList {
        let key = Self::key(layer, blend_mode, usage, program, texture, palette);
        Self::fetch(&mut self.normal, key, texture, palette)
    }

    /// Fetch-or-create a screen-space list for the given material key
    pub fn get_overlay_quads(
        &mut self,
        layer: Layer,
        blend_mode: BlendMode,
        usage: BufferUsage,
        program: Program,
        texture: Option<&Arc<Texture>>,
        palette: Option<&Arc<Palette>>,
    ) -> &mut DisplayList {
        let key = Self::key(layer, blend_mode, usage, program, texture, palette);
        Self::fetch(&mut self.overlay, key, texture, palette)
    }

    /// Find a captured list by its ownership token
    pub fn get_captured(&mut self, timestamp: i64) -> Option<&mut DisplayList> {
        self.normal
            .iter_mut()
            .chain(self.overlay.iter_mut())
            .find(|list| list.matches_timestamp(timestamp))
    }

    /// Release a captured list back into normal reuse
    pub fn release(&mut self, timestamp: i64) -> bool {
        match self.get_captured(timestamp) {
            Some(list) => list.release(),
            None => false,
        }
    }

    /// Upload and draw every list in key order, then drop the panic flag
    pub fn flush(&mut self, gfx: &mut Gfx) {
        gfx.begin_frame();
        gfx.set_projection(Mat4::orthographic_rh_gl(
            self.viewport.x,
            self.viewport.right(),
            self.viewport.bottom(),
            self.viewport.y,
            -1.0,
            1.0,
        ));
        for list in &mut self.normal {
            list.flush(gfx);
        }
        gfx.set_projection(Mat4::orthographic_rh_gl(
            0.0,
            SCREEN_WIDTH,
            SCREEN_HEIGHT,
            0.0,
            -1.0,
            1.0,
        ));
        for list in &mut self.overlay {
            list.flush(gfx);
        }
        self.panic = false;
    }

    /// Drop every non-captured list (scene transition) and force a full
    /// geometry rewrite on the next frame
    pub fn recycle(&mut self) {
        for lists in [&mut self.normal, &mut self.overlay] {
            let mut index = 0;
            while index < lists.len() {
                if lists[index].persists() {
                    index += 1;
                } else {
                    let mut list = lists.remove(index);
                    list.destroy();
                }
            }
        }
        self.panic = true;
    }

    pub fn normal_lists(&self) -> impl Iterator<Item = &DisplayList> {
        self.normal.iter()
    }

    pub fn overlay_lists(&self) -> impl Iterator<Item = &DisplayList> {
        self.overlay.iter()
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::video::display_list::SINGLE_QUAD;

    fn sprites(renderer: &mut Renderer, layer: i32) -> &mut DisplayList {
        renderer.get_normal_quads(
            Layer(layer),
            BlendMode::Alpha,
            BufferUsage::Dynamic,
            Program::Sprites,
            None,
            None,
        )
    }

    #[test]
    fn test_lookup_returns_matching_list() {
        let mut renderer = Renderer::new();
        sprites(&mut renderer, 2).begin(SINGLE_QUAD).end();
        sprites(&mut renderer, 2).begin(SINGLE_QUAD).end();
        assert_eq!(renderer.normal_lists().count(), 1);
        assert_eq!(renderer.normal_lists().next().unwrap().written(), 2);
    }

    #[test]
    fn test_lists_stay_sorted_by_key() {
        let mut renderer = Renderer::new();
        sprites(&mut renderer, 3);
        sprites(&mut renderer, 1);
        renderer.get_normal_quads(
            Layer(1),
            BlendMode::Add,
            BufferUsage::Dynamic,
            Program::Sprites,
            None,
            None,
        );
        sprites(&mut renderer, 2);
        let keys: Vec<_> = renderer.normal_lists().map(|l| *l.key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys.len(), 4);
    }

    #[test]
    fn test_captured_list_bypasses_key_lookup() {
        let mut renderer = Renderer::new();
        let token = sprites(&mut renderer, 2).capture();
        assert_ne!(token, 0);
        // Key lookup must now create a fresh list instead of reusing the
        // captured one.
        sprites(&mut renderer, 2);
        assert_eq!(renderer.normal_lists().count(), 2);
        assert!(renderer.get_captured(token).is_some());
        assert!(renderer.release(token));
        assert!(renderer.get_captured(token).is_none());
    }

    #[test]
    fn test_recycle_keeps_captured_lists_and_panics() {
        let mut renderer = Renderer::new();
        let token = sprites(&mut renderer, 2).capture();
        sprites(&mut renderer, 1);
        sprites(&mut renderer, 3);
        assert!(!renderer.panicked());
        renderer.recycle();
        assert!(renderer.panicked());
        assert_eq!(renderer.normal_lists().count(), 1);
        assert!(renderer.get_captured(token).is_some());
    }

    #[test]
    fn test_overlay_pool_is_separate() {
        let mut renderer = Renderer::new();
        sprites(&mut renderer, 2);
        renderer.get_overlay_quads(
            Layer::HEADS_UP,
            BlendMode::Alpha,
            BufferUsage::Dynamic,
            Program::Colors,
            None,
            None,
        );
        assert_eq!(renderer.normal_lists().count(), 1);
        assert_eq!(renderer.overlay_lists().count(), 1);
    }
}
