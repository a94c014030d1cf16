//! Animation resources
//!
//! An animation is a set of named states (sequences) loaded from a RON
//! description: frame timing, repeat/reflect flags, per-direction action
//! points and per-frame source rectangles, all normalized into texture
//! space by the description's inverter. Loading may run on the worker
//! pool; every query funnels through the blocking `assure` gate.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use macroquad::prelude::Vec2;
use serde::Deserialize;

use super::display_list::SINGLE_QUAD;
use super::renderer::Renderer;
use super::texture::{Palette, Texture};
use super::types::{BlendMode, BufferUsage, Layer, Program};
use super::vertex::Mirroring;
use crate::assets::{AsyncOp, ResourceContext};
use crate::util::Rect;

/// On-disk animation description
#[derive(Debug, Clone, Deserialize)]
pub struct AnimationFile {
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub palette: Option<String>,
    /// Texture dimensions used to normalize frame rectangles; zero
    /// components fall back to an identity mapping.
    #[serde(default)]
    pub inverter: [f32; 2],
    #[serde(default)]
    pub states: Vec<StateEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateEntry {
    /// Origin of this state's region on the sheet, in texels
    #[serde(default)]
    pub starts: [f32; 2],
    /// Frame dimensions in texels
    pub vksize: [f32; 2],
    /// Seconds per frame; zero freezes the sequence
    #[serde(default)]
    pub tdelay: f64,
    #[serde(default = "one_frame")]
    pub frames: usize,
    #[serde(default = "enabled")]
    pub repeat: bool,
    /// Reuse the stored strips with horizontal mirroring for directions
    /// beyond the stored count (left-facing variants share right-facing
    /// frames)
    #[serde(default)]
    pub reflect: bool,
    #[serde(default)]
    pub directions: Vec<DirectionEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectionEntry {
    #[serde(default)]
    pub action_point: [f32; 2],
    /// Per-frame (x, y, w, h) offsets in texels, relative to `starts`.
    /// Zero size falls back to `vksize`; an empty list lays frames out as
    /// a horizontal strip.
    #[serde(default)]
    pub frames: Vec<[f32; 4]>,
}

fn one_frame() -> usize {
    1
}

fn enabled() -> bool {
    true
}

struct Strip {
    action_point: Vec2,
    rects: Vec<Rect>,
}

/// One named animation state: ordered frames with shared timing
pub struct Sequence {
    dimensions: Vec2,
    delay: f64,
    frames: usize,
    repeat: bool,
    reflect: bool,
    strips: Vec<Strip>,
}

impl Sequence {
    fn from_entry(entry: &StateEntry, inverts: Vec2) -> Self {
        let dimensions = Vec2::new(entry.vksize[0], entry.vksize[1]);
        let mut directions = entry.directions.clone();
        if directions.is_empty() {
            directions.push(DirectionEntry::default());
        }
        let strips = directions
            .iter()
            .map(|direction| {
                let rects = (0..entry.frames)
                    .map(|frame| {
                        let points = direction
                            .frames
                            .get(frame)
                            .copied()
                            .unwrap_or([frame as f32 * dimensions.x, 0.0, 0.0, 0.0]);
                        let w = if points[2] > 0.0 { points[2] } else { dimensions.x };
                        let h = if points[3] > 0.0 { points[3] } else { dimensions.y };
                        Rect::new(
                            (entry.starts[0] + points[0]) * inverts.x,
                            (entry.starts[1] + points[1]) * inverts.y,
                            w * inverts.x,
                            h * inverts.y,
                        )
                    })
                    .collect();
                Strip {
                    action_point: Vec2::new(direction.action_point[0], direction.action_point[1]),
                    rects,
                }
            })
            .collect();
        Self {
            dimensions,
            delay: entry.tdelay,
            frames: entry.frames,
            repeat: entry.repeat,
            reflect: entry.reflect,
            strips,
        }
    }

    pub fn dimensions(&self) -> Vec2 {
        self.dimensions
    }

    /// Map a requested direction onto a stored strip. Directions beyond the
    /// stored count reuse strips with horizontal mirroring when `reflect`
    /// is set, otherwise degrade to the first strip.
    fn resolve(&self, direction: usize) -> (usize, bool) {
        if direction < self.strips.len() || self.strips.is_empty() {
            (direction, false)
        } else if self.reflect {
            ((direction - self.strips.len()) % self.strips.len(), true)
        } else {
            (0, false)
        }
    }

    /// Whether the requested direction rides on mirrored frames
    pub fn reflected(&self, direction: usize) -> bool {
        self.resolve(direction).1
    }

    /// Source rectangle for a frame, already in normalized texture space
    pub fn quad(&self, frame: usize, direction: usize) -> Rect {
        let (strip, _) = self.resolve(direction);
        self.strips
            .get(strip)
            .and_then(|s| s.rects.get(frame.min(self.frames.saturating_sub(1))))
            .copied()
            .unwrap_or_default()
    }

    /// Placement anchor for a direction, flipped across the frame box by
    /// the active mirroring
    pub fn origin(&self, direction: usize, mirroring: Mirroring) -> Vec2 {
        let (strip, _) = self.resolve(direction);
        let point = self
            .strips
            .get(strip)
            .map(|s| s.action_point)
            .unwrap_or_default();
        match mirroring {
            Mirroring::None => point,
            Mirroring::Horizontal => Vec2::new(self.dimensions.x - point.x, point.y),
            Mirroring::Vertical => Vec2::new(point.x, self.dimensions.y - point.y),
            Mirroring::Both => self.dimensions - point,
        }
    }

    /// Attachment offset within the frame (weapon muzzles and the like)
    pub fn action_point(&self, direction: usize, mirroring: Mirroring) -> Vec2 {
        self.origin(direction, mirroring)
    }

    /// Advance the caller's timer/frame by the per-frame delay. Repeating
    /// sequences wrap; non-repeating sequences clamp at the last frame and
    /// leave the timer saturated so `finished` holds.
    pub fn update(&self, delta: f64, amend: &Cell<bool>, timer: &mut f64, frame: &mut usize) {
        if self.frames == 0 || self.delay <= 0.0 {
            return;
        }
        *timer += delta;
        while *timer >= self.delay {
            if *frame + 1 >= self.frames {
                if self.repeat {
                    *frame = 0;
                    *timer -= self.delay;
                    amend.set(true);
                } else {
                    *frame = self.frames - 1;
                    break;
                }
            } else {
                *frame += 1;
                *timer -= self.delay;
                amend.set(true);
            }
        }
    }

    /// A repeating sequence never finishes; a non-repeating one finishes
    /// once it sits on its last frame with a saturated timer.
    pub fn finished(&self, frame: usize, timer: f64) -> bool {
        !self.repeat && self.frames > 0 && frame + 1 >= self.frames && timer >= self.delay
    }
}

/// Everything a loaded animation owns: sequences plus weak-by-convention
/// references into the shared texture/palette store
pub struct AnimationSet {
    sequences: Vec<Sequence>,
    texture: Option<Arc<Texture>>,
    palette: Option<Arc<Palette>>,
}

enum AnimState {
    Empty,
    Pending(AsyncOp<Option<AnimationSet>>),
    Ready(AnimationSet),
    Failed,
}

pub struct Animation {
    id: u64,
    state: Mutex<AnimState>,
}

impl Animation {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            state: Mutex::new(AnimState::Empty),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Synchronous load. Populating twice is logged and ignored.
    pub fn load(&self, path: &Path, ctx: &ResourceContext) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if !matches!(*state, AnimState::Empty) {
            println!("Warning! Tried to overwrite animation!");
            return;
        }
        *state = match load_set(path, ctx) {
            Some(set) => AnimState::Ready(set),
            None => AnimState::Failed,
        };
    }

    /// Background load on the worker pool; `assure` is the rendezvous
    pub fn load_async(&self, path: PathBuf, ctx: &ResourceContext) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if !matches!(*state, AnimState::Empty) {
            println!("Warning! Tried to overwrite animation!");
            return;
        }
        let ctx = ctx.clone();
        *state = AnimState::Pending(ctx.workers().submit(move || load_set(&path, &ctx)));
    }

    /// Non-blocking readiness probe
    pub fn ready(&self) -> bool {
        match self.state.lock() {
            Ok(state) => !matches!(*state, AnimState::Pending(_) | AnimState::Empty),
            Err(_) => false,
        }
    }

    /// Run a query against the loaded set, blocking on an outstanding load
    /// first. Returns `None` when the animation is empty or failed.
    fn with<R>(&self, query: impl FnOnce(&AnimationSet) -> R) -> Option<R> {
        let Ok(mut state) = self.state.lock() else {
            return None;
        };
        if matches!(*state, AnimState::Pending(_)) {
            if let AnimState::Pending(op) = std::mem::replace(&mut *state, AnimState::Failed) {
                *state = match op.wait().flatten() {
                    Some(set) => AnimState::Ready(set),
                    None => AnimState::Failed,
                };
            }
        }
        match &*state {
            AnimState::Ready(set) => Some(query(set)),
            _ => None,
        }
    }

    /// Advance a consumer's timer/frame for one state; out-of-range states
    /// are a no-op.
    pub fn update(
        &self,
        delta: f64,
        amend: &Cell<bool>,
        state: usize,
        timer: &mut f64,
        frame: &mut usize,
    ) {
        self.with(|set| {
            if let Some(sequence) = set.sequences.get(state) {
                sequence.update(delta, amend, timer, frame);
            }
        });
    }

    pub fn is_finished(&self, state: usize, frame: usize, timer: f64) -> bool {
        self.with(|set| {
            set.sequences
                .get(state)
                .map(|sequence| sequence.finished(frame, timer))
                .unwrap_or(false)
        })
        .unwrap_or(false)
    }

    pub fn get_origin(&self, state: usize, direction: usize, mirroring: Mirroring) -> Vec2 {
        self.with(|set| {
            set.sequences
                .get(state)
                .map(|sequence| sequence.origin(direction, mirroring))
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    pub fn get_action_point(&self, state: usize, direction: usize, mirroring: Mirroring) -> Vec2 {
        self.with(|set| {
            set.sequences
                .get(state)
                .map(|sequence| sequence.action_point(direction, mirroring))
                .unwrap_or_default()
        })
        .unwrap_or_default()
    }

    /// Coarse visibility probe used before any display-list work
    pub fn visible(
        &self,
        viewport: &Rect,
        state: usize,
        direction: usize,
        layer: Layer,
        position: Vec2,
        scale: Vec2,
    ) -> bool {
        if layer == Layer::INVISIBLE {
            return false;
        }
        self.with(|set| {
            set.sequences
                .get(state)
                .map(|sequence| {
                    let origin = sequence.origin(direction, Mirroring::None);
                    viewport.overlaps(position - origin, sequence.dimensions() * scale)
                })
                .unwrap_or(false)
        })
        .unwrap_or(false)
    }

    /// World-space render with rotation about a pivot
    #[allow(clippy::too_many_arguments)]
    pub fn render_rotated(
        &self,
        renderer: &mut Renderer,
        viewport: &Rect,
        panic: bool,
        amend: &Cell<bool>,
        state: usize,
        frame: usize,
        direction: usize,
        mirroring: Mirroring,
        layer: Layer,
        alpha: f32,
        table: f32,
        position: Vec2,
        scale: Vec2,
        angle: f32,
        pivot: Vec2,
    ) {
        self.emit(
            renderer,
            Some(viewport),
            panic,
            amend,
            state,
            frame,
            direction,
            mirroring,
            layer,
            alpha,
            table,
            position,
            scale,
            angle,
            pivot,
            false,
        );
    }

    /// World-space render without rotation
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        renderer: &mut Renderer,
        viewport: &Rect,
        panic: bool,
        amend: &Cell<bool>,
        state: usize,
        frame: usize,
        direction: usize,
        mirroring: Mirroring,
        layer: Layer,
        alpha: f32,
        table: f32,
        position: Vec2,
        scale: Vec2,
    ) {
        self.emit(
            renderer,
            Some(viewport),
            panic,
            amend,
            state,
            frame,
            direction,
            mirroring,
            layer,
            alpha,
            table,
            position,
            scale,
            0.0,
            Vec2::ZERO,
            false,
        );
    }

    /// Screen-space render for HUD elements; no viewport rejection
    #[allow(clippy::too_many_arguments)]
    pub fn render_overlay(
        &self,
        renderer: &mut Renderer,
        amend: &Cell<bool>,
        state: usize,
        frame: usize,
        direction: usize,
        table: f32,
        position: Vec2,
    ) {
        self.emit(
            renderer,
            None,
            false,
            amend,
            state,
            frame,
            direction,
            Mirroring::None,
            Layer::HEADS_UP,
            1.0,
            table,
            position,
            Vec2::ONE,
            0.0,
            Vec2::ZERO,
            true,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        renderer: &mut Renderer,
        viewport: Option<&Rect>,
        panic: bool,
        amend: &Cell<bool>,
        state: usize,
        frame: usize,
        direction: usize,
        mirroring: Mirroring,
        layer: Layer,
        alpha: f32,
        mut table: f32,
        position: Vec2,
        scale: Vec2,
        angle: f32,
        pivot: Vec2,
        overlay: bool,
    ) {
        self.with(|set| {
            let Some(sequence) = set.sequences.get(state) else {
                return;
            };
            let mirroring = if sequence.reflected(direction) {
                mirroring.flipped_horizontal()
            } else {
                mirroring
            };
            let dimensions = sequence.dimensions();
            let origin = sequence.origin(direction, mirroring);
            if let Some(viewport) = viewport {
                if !viewport.overlaps(position - origin, dimensions * scale) {
                    return;
                }
            }
            let mut program = Program::Sprites;
            if let Some(palette) = &set.palette {
                program = Program::Indexed;
                table = palette.convert(table);
            }
            let list = if overlay {
                renderer.get_overlay_quads(
                    layer,
                    BlendMode::Alpha,
                    BufferUsage::Dynamic,
                    program,
                    set.texture.as_ref(),
                    set.palette.as_ref(),
                )
            } else {
                renderer.get_normal_quads(
                    layer,
                    BlendMode::Alpha,
                    BufferUsage::Dynamic,
                    program,
                    set.texture.as_ref(),
                    set.palette.as_ref(),
                )
            };
            if amend.get() || panic {
                amend.set(false);
                list.begin(SINGLE_QUAD)
                    .vtx_major_write(
                        sequence.quad(frame, direction),
                        dimensions,
                        table,
                        alpha,
                        mirroring,
                    )
                    .vtx_transform_write(position - origin, scale, pivot, angle)
                    .end();
            } else {
                list.skip(SINGLE_QUAD);
            }
        });
    }
}

fn load_set(path: &Path, ctx: &ResourceContext) -> Option<AnimationSet> {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            println!("Failed to load animation from {}: {e}", path.display());
            return None;
        }
    };
    let file: AnimationFile = match ron::from_str(&source) {
        Ok(file) => file,
        Err(e) => {
            println!("Failed to parse animation {}: {e}", path.display());
            return None;
        }
    };
    let inverter = Vec2::new(file.inverter[0], file.inverter[1]);
    let inverts = if inverter.x == 0.0 || inverter.y == 0.0 {
        Vec2::ONE
    } else {
        Vec2::ONE / inverter
    };
    let sequences = file
        .states
        .iter()
        .map(|entry| Sequence::from_entry(entry, inverts))
        .collect();
    Some(AnimationSet {
        sequences,
        texture: file.material.as_deref().map(|name| ctx.texture(name)),
        palette: file.palette.as_deref().map(|name| ctx.palette(name)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const WALK: &str = r#"(
        inverter: (64.0, 32.0),
        states: [
            (
                starts: (0.0, 0.0),
                vksize: (16.0, 16.0),
                tdelay: 0.1,
                frames: 2,
                repeat: true,
                directions: [
                    ( action_point: (8.0, 14.0) ),
                ],
            ),
            (
                starts: (0.0, 16.0),
                vksize: (16.0, 16.0),
                tdelay: 0.1,
                frames: 3,
                repeat: false,
            ),
        ],
    )"#;

    fn context() -> (tempfile::TempDir, ResourceContext) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sprites")).unwrap();
        let mut file = std::fs::File::create(dir.path().join("sprites/walk.ron")).unwrap();
        write!(file, "{WALK}").unwrap();
        let ctx = ResourceContext::mount(dir.path()).unwrap();
        (dir, ctx)
    }

    fn loaded(ctx: &ResourceContext) -> Animation {
        let animation = Animation::new(1);
        animation.load(&ctx.root().join("sprites/walk.ron"), ctx);
        animation
    }

    #[test]
    fn test_repeating_sequence_cycles_and_never_finishes() {
        let (_dir, ctx) = context();
        let animation = loaded(&ctx);
        let amend = Cell::new(false);
        let mut timer = 0.0;
        let mut frame = 0;
        animation.update(0.1, &amend, 0, &mut timer, &mut frame);
        assert_eq!(frame, 1);
        assert!(amend.get());
        assert!(!animation.is_finished(0, frame, timer));
        amend.set(false);
        animation.update(0.1, &amend, 0, &mut timer, &mut frame);
        assert_eq!(frame, 0);
        assert!(amend.get());
        assert!(!animation.is_finished(0, frame, timer));
    }

    #[test]
    fn test_nonrepeating_sequence_clamps_and_finishes() {
        let (_dir, ctx) = context();
        let animation = loaded(&ctx);
        let amend = Cell::new(false);
        let mut timer = 0.0;
        let mut frame = 0;
        assert!(!animation.is_finished(1, frame, timer));
        animation.update(1.0, &amend, 1, &mut timer, &mut frame);
        assert_eq!(frame, 2);
        assert!(animation.is_finished(1, frame, timer));
    }

    #[test]
    fn test_out_of_range_state_is_a_noop() {
        let (_dir, ctx) = context();
        let animation = loaded(&ctx);
        let amend = Cell::new(false);
        let mut timer = 0.0;
        let mut frame = 0;
        animation.update(5.0, &amend, 9, &mut timer, &mut frame);
        assert_eq!(frame, 0);
        assert!(!amend.get());
        assert_eq!(animation.get_origin(9, 0, Mirroring::None), Vec2::ZERO);
        assert!(!animation.is_finished(9, 0, 100.0));
    }

    #[test]
    fn test_frame_rects_are_normalized_strips() {
        let (_dir, ctx) = context();
        let animation = loaded(&ctx);
        let quad = animation.with(|set| set.sequences[0].quad(1, 0)).unwrap();
        // Second frame of a horizontal 16x16 strip on a 64x32 sheet.
        assert_eq!(quad, Rect::new(0.25, 0.0, 0.25, 0.5));
    }

    #[test]
    fn test_origin_flips_with_mirroring() {
        let (_dir, ctx) = context();
        let animation = loaded(&ctx);
        assert_eq!(
            animation.get_origin(0, 0, Mirroring::None),
            Vec2::new(8.0, 14.0)
        );
        assert_eq!(
            animation.get_origin(0, 0, Mirroring::Horizontal),
            Vec2::new(8.0, 14.0)
        );
        assert_eq!(
            animation.get_origin(0, 0, Mirroring::Vertical),
            Vec2::new(8.0, 2.0)
        );
    }

    #[test]
    fn test_async_load_blocks_on_first_query() {
        let (_dir, ctx) = context();
        let animation = ctx.animation("walk");
        // The query forces the synchronization point even if the worker
        // hasn't finished yet.
        assert!(!animation.is_finished(0, 0, 10.0));
        assert!(animation.ready());
    }

    #[test]
    fn test_second_load_is_ignored() {
        let (_dir, ctx) = context();
        let animation = loaded(&ctx);
        animation.load(&ctx.root().join("sprites/walk.ron"), &ctx);
        let count = animation.with(|set| set.sequences.len()).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_missing_file_degrades_to_empty() {
        let (_dir, ctx) = context();
        let animation = Animation::new(7);
        animation.load(&ctx.root().join("sprites/ghost.ron"), &ctx);
        assert!(animation.ready());
        assert!(!animation.visible(
            &Rect::new(0.0, 0.0, 320.0, 180.0),
            0,
            0,
            Layer::ACTORS,
            Vec2::ZERO,
            Vec2::ONE,
        ));
    }

    #[test]
    fn test_render_amend_skip_duality() {
        let (_dir, ctx) = context();
        let animation = loaded(&ctx);
        let mut renderer = Renderer::new();
        let viewport = Rect::new(0.0, 0.0, 320.0, 180.0);
        let amend = Cell::new(true);
        animation.render(
            &mut renderer,
            &viewport,
            false,
            &amend,
            0,
            0,
            0,
            Mirroring::None,
            Layer::ACTORS,
            1.0,
            0.0,
            Vec2::new(100.0, 100.0),
            Vec2::ONE,
        );
        // The write consumed the dirty flag and dirtied the list.
        assert!(!amend.get());
        let written: Vec<_> = renderer
            .normal_lists()
            .map(|l| (l.written(), l.amended()))
            .collect();
        assert_eq!(written, vec![(1, true)]);
        // A clean sprite replays via skip: cursor advances, list stays clean.
        let mut renderer = Renderer::new();
        let amend = Cell::new(false);
        animation.render(
            &mut renderer,
            &viewport,
            false,
            &amend,
            0,
            0,
            0,
            Mirroring::None,
            Layer::ACTORS,
            1.0,
            0.0,
            Vec2::new(100.0, 100.0),
            Vec2::ONE,
        );
        let written: Vec<_> = renderer
            .normal_lists()
            .map(|l| (l.written(), l.amended()))
            .collect();
        assert_eq!(written, vec![(1, false)]);
    }

    #[test]
    fn test_render_rejects_offscreen_sprites() {
        let (_dir, ctx) = context();
        let animation = loaded(&ctx);
        let mut renderer = Renderer::new();
        let viewport = Rect::new(0.0, 0.0, 320.0, 180.0);
        let amend = Cell::new(true);
        animation.render(
            &mut renderer,
            &viewport,
            false,
            &amend,
            0,
            0,
            0,
            Mirroring::None,
            Layer::ACTORS,
            1.0,
            0.0,
            Vec2::new(-500.0, -500.0),
            Vec2::ONE,
        );
        // Rejected before touching the builder; the dirty flag survives.
        assert!(amend.get());
        assert_eq!(renderer.normal_lists().count(), 0);
    }

    #[test]
    fn test_render_bad_state_is_a_noop() {
        let (_dir, ctx) = context();
        let animation = loaded(&ctx);
        let mut renderer = Renderer::new();
        let viewport = Rect::new(0.0, 0.0, 320.0, 180.0);
        let amend = Cell::new(true);
        animation.render(
            &mut renderer,
            &viewport,
            false,
            &amend,
            42,
            0,
            0,
            Mirroring::None,
            Layer::ACTORS,
            1.0,
            0.0,
            Vec2::new(100.0, 100.0),
            Vec2::ONE,
        );
        assert_eq!(renderer.normal_lists().count(), 0);
    }

    #[test]
    fn test_panic_forces_rewrite_of_clean_sprites() {
        let (_dir, ctx) = context();
        let animation = loaded(&ctx);
        let mut renderer = Renderer::new();
        let viewport = Rect::new(0.0, 0.0, 320.0, 180.0);
        let amend = Cell::new(false);
        animation.render(
            &mut renderer,
            &viewport,
            true,
            &amend,
            0,
            0,
            0,
            Mirroring::None,
            Layer::ACTORS,
            1.0,
            0.0,
            Vec2::new(100.0, 100.0),
            Vec2::ONE,
        );
        let written: Vec<_> = renderer
            .normal_lists()
            .map(|l| (l.written(), l.amended()))
            .collect();
        assert_eq!(written, vec![(1, true)]);
    }
}
