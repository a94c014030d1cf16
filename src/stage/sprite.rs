//! Sprite component
//!
//! Per-entity animation playback state: which sequence, which frame, the
//! dirty bit that drives the renderer's amend/skip protocol, and the
//! spatial fields a transform write consumes. The facing field replaces
//! the old habit of overlaying variation/direction in one integer.

use std::cell::Cell;
use std::sync::Arc;

use macroquad::prelude::Vec2;

use crate::util::Rect;
use crate::video::{Animation, Layer, Mirroring, Renderer};

/// Sentinel for "no animation state selected"
pub const NON_STATE: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Right,
    Left,
    RightUp,
    LeftUp,
    RightDown,
    LeftDown,
}

impl Direction {
    pub fn from_index(index: usize) -> Self {
        match index {
            1 => Self::Left,
            2 => Self::RightUp,
            3 => Self::LeftUp,
            4 => Self::RightDown,
            5 => Self::LeftDown,
            _ => Self::Right,
        }
    }

    pub fn strip(self) -> usize {
        self as usize
    }
}

/// How the sprite picks its strip: either a raw variation index or a
/// gameplay-facing direction. One field, explicit discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    Variation(usize),
    Direction(Direction),
}

impl Facing {
    pub fn strip_index(self) -> usize {
        match self {
            Self::Variation(index) => index,
            Self::Direction(direction) => direction.strip(),
        }
    }
}

impl Default for Facing {
    fn default() -> Self {
        Self::Variation(0)
    }
}

pub struct Sprite {
    file: Option<Arc<Animation>>,
    pub amend: Cell<bool>,
    pub timer: f64,
    pub alpha: f32,
    pub table: f32,
    pub state: usize,
    pub facing: Facing,
    pub mirroring: Mirroring,
    pub frame: usize,
    pub layer: Layer,
    pub scale: Vec2,
    pub position: Vec2,
    pub pivot: Vec2,
    pub angle: f32,
}

impl Sprite {
    pub fn new(file: Arc<Animation>) -> Self {
        Self {
            file: Some(file),
            ..Self::empty()
        }
    }

    pub fn empty() -> Self {
        Self {
            file: None,
            amend: Cell::new(true),
            timer: 0.0,
            alpha: 1.0,
            table: 0.0,
            state: 0,
            facing: Facing::default(),
            mirroring: Mirroring::None,
            frame: 0,
            layer: Layer::ACTORS,
            scale: Vec2::ONE,
            position: Vec2::ZERO,
            pivot: Vec2::ZERO,
            angle: 0.0,
        }
    }

    pub fn reset(&mut self) {
        self.timer = 0.0;
        self.frame = 0;
        self.amend.set(true);
    }

    /// Switch sequences; a no-op when already in that state
    pub fn new_state(&mut self, state: usize) {
        if self.state != state {
            self.state = state;
            self.reset();
        }
    }

    pub fn set_facing(&mut self, facing: Facing) {
        if self.facing != facing {
            self.facing = facing;
            self.amend.set(true);
        }
    }

    pub fn set_mirroring(&mut self, mirroring: Mirroring) {
        if self.mirroring != mirroring {
            self.mirroring = mirroring;
            self.amend.set(true);
        }
    }

    /// Move the sprite, dirtying it only when the position actually changed
    pub fn set_position(&mut self, position: Vec2) {
        if self.position != position {
            self.position = position;
            self.amend.set(true);
        }
    }

    pub fn finished(&self) -> bool {
        match &self.file {
            Some(file) => {
                self.state != NON_STATE && file.is_finished(self.state, self.frame, self.timer)
            }
            None => true,
        }
    }

    /// World position of this frame's action point
    pub fn action_point(&self) -> Vec2 {
        match &self.file {
            Some(file) => {
                self.position
                    + file.get_action_point(self.state, self.facing.strip_index(), self.mirroring)
            }
            None => self.position,
        }
    }

    pub fn update(&mut self, delta: f64) {
        if self.state == NON_STATE {
            return;
        }
        if let Some(file) = &self.file {
            file.update(delta, &self.amend, self.state, &mut self.timer, &mut self.frame);
        }
    }

    pub fn render(&self, renderer: &mut Renderer, viewport: &Rect, panic: bool) {
        if self.state == NON_STATE || self.layer == Layer::INVISIBLE {
            return;
        }
        let Some(file) = &self.file else {
            return;
        };
        let direction = self.facing.strip_index();
        if self.angle != 0.0 {
            file.render_rotated(
                renderer,
                viewport,
                panic,
                &self.amend,
                self.state,
                self.frame,
                direction,
                self.mirroring,
                self.layer,
                self.alpha,
                self.table,
                self.position,
                self.scale,
                self.angle,
                self.pivot,
            );
        } else {
            file.render(
                renderer,
                viewport,
                panic,
                &self.amend,
                self.state,
                self.frame,
                direction,
                self.mirroring,
                self.layer,
                self.alpha,
                self.table,
                self.position,
                self.scale,
            );
        }
    }
}
