//! Camera
//!
//! Centers the world-space viewport, optionally following an actor, with
//! script-driven screen shake (infinite or timed).

use macroquad::prelude::Vec2;
use macroquad::rand::gen_range;

use super::scene::Scene;
use crate::util::Rect;
use crate::video::{SCREEN_HEIGHT, SCREEN_WIDTH};

/// Follow target: 0 is the hero, anything else an actor id
const FOLLOW_HERO: i32 = 0;

pub struct Camera {
    center: Vec2,
    follow: Option<i32>,
    quake_power: f32,
    quake_timer: f64,
    endless: bool,
}

impl Camera {
    pub fn new() -> Self {
        Self {
            center: Vec2::new(SCREEN_WIDTH * 0.5, SCREEN_HEIGHT * 0.5),
            follow: Some(FOLLOW_HERO),
            quake_power: 0.0,
            quake_timer: 0.0,
            endless: false,
        }
    }

    pub fn set_center(&mut self, center: Vec2) {
        self.center = center;
    }

    /// Shake until something stops it
    pub fn quake(&mut self, factor: f32) {
        self.quake_power = factor;
        self.endless = true;
    }

    /// Shake for a fixed duration
    pub fn quake_timed(&mut self, factor: f32, seconds: f64) {
        self.quake_power = factor;
        self.quake_timer = seconds;
        self.endless = false;
    }

    pub fn quaking(&self) -> bool {
        self.quake_power != 0.0 && (self.endless || self.quake_timer > 0.0)
    }

    pub fn stop_quake(&mut self) {
        self.quake_power = 0.0;
        self.quake_timer = 0.0;
        self.endless = false;
    }

    /// Follow an actor id; negative clears the target
    pub fn follow(&mut self, id: i32) {
        self.follow = if id < 0 { None } else { Some(id) };
    }

    pub fn update(&mut self, delta: f64, scene: &Scene) {
        if let Some(target) = self.follow {
            let position = if target == FOLLOW_HERO {
                Some(scene.hero.position())
            } else {
                scene.actor_position(target)
            };
            if let Some(position) = position {
                self.center = position;
            }
        }
        if !self.endless && self.quake_timer > 0.0 {
            self.quake_timer -= delta;
            if self.quake_timer <= 0.0 {
                self.stop_quake();
            }
        }
    }

    /// World-space view rect, with shake applied
    pub fn viewport(&self) -> Rect {
        let mut offset = Vec2::ZERO;
        if self.quaking() {
            offset = Vec2::new(
                gen_range(-self.quake_power, self.quake_power),
                gen_range(-self.quake_power, self.quake_power),
            );
        }
        Rect::new(
            self.center.x - SCREEN_WIDTH * 0.5 + offset.x,
            self.center.y - SCREEN_HEIGHT * 0.5 + offset.y,
            SCREEN_WIDTH,
            SCREEN_HEIGHT,
        )
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new()
    }
}
