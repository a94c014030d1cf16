//! Player avatar state
//!
//! The slice of avatar state the scripting surface manipulates: barrier
//! (health), power, equipment flags, teleports, and scripted animation.
//! Movement control beyond script-driven bumps lives outside the core.

use macroquad::prelude::Vec2;

use super::sprite::{Direction, Facing, Sprite};
use crate::assets::ResourceContext;
use crate::util::Rect;
use crate::video::{Layer, Renderer};

const BUMP_SPEED: f32 = 60.0;

pub struct Hero {
    pub sprite: Sprite,
    pub velocity: Vec2,
    visible: bool,
    barrier: i32,
    max_barrier: i32,
    power: i32,
    equips: u32,
}

impl Hero {
    pub fn new(ctx: &ResourceContext) -> Self {
        let mut sprite = Sprite::new(ctx.animation("hero"));
        sprite.layer = Layer::ACTORS;
        Self {
            sprite,
            velocity: Vec2::ZERO,
            visible: true,
            barrier: 3,
            max_barrier: 3,
            power: 0,
            equips: 0,
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
        self.sprite.amend.set(true);
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn animate(&mut self, state: usize, direction: usize) {
        self.sprite.new_state(state);
        self.sprite
            .set_facing(Facing::Direction(Direction::from_index(direction)));
    }

    pub fn teleport(&mut self, x: f32, y: f32) {
        self.velocity = Vec2::ZERO;
        self.sprite.set_position(Vec2::new(x, y));
    }

    pub fn position(&self) -> Vec2 {
        self.sprite.position
    }

    pub fn life_up(&mut self, amount: i32) {
        self.barrier = (self.barrier + amount).clamp(0, self.max_barrier);
    }

    /// Raise the barrier ceiling and heal into it
    pub fn life_boost(&mut self, amount: i32) {
        self.max_barrier += amount;
        self.barrier = self.max_barrier;
    }

    pub fn barrier(&self) -> (i32, i32) {
        (self.barrier, self.max_barrier)
    }

    pub fn mut_power(&mut self, amount: i32) {
        self.power += amount;
    }

    pub fn power(&self) -> i32 {
        self.power
    }

    pub fn set_equip(&mut self, flag: u32, value: bool) {
        if value {
            self.equips |= 1 << flag;
        } else {
            self.equips &= !(1 << flag);
        }
    }

    pub fn equipped(&self, flag: u32) -> bool {
        self.equips & (1 << flag) != 0
    }

    /// Scripted shove in one of the eight directions
    pub fn bump(&mut self, direction: usize) {
        let direction = Direction::from_index(direction);
        self.velocity = match direction {
            Direction::Right => Vec2::new(BUMP_SPEED, 0.0),
            Direction::Left => Vec2::new(-BUMP_SPEED, 0.0),
            Direction::RightUp => Vec2::new(BUMP_SPEED, -BUMP_SPEED),
            Direction::LeftUp => Vec2::new(-BUMP_SPEED, -BUMP_SPEED),
            Direction::RightDown => Vec2::new(BUMP_SPEED, BUMP_SPEED),
            Direction::LeftDown => Vec2::new(-BUMP_SPEED, BUMP_SPEED),
        };
    }

    pub fn update(&mut self, delta: f64) {
        if self.velocity != Vec2::ZERO {
            let position = self.sprite.position + self.velocity * delta as f32;
            self.sprite.set_position(position);
            // Scripted bumps decay instead of integrating forever.
            self.velocity *= 1.0 - (delta as f32 * 4.0).min(1.0);
            if self.velocity.length_squared() < 1.0 {
                self.velocity = Vec2::ZERO;
            }
        }
        self.sprite.update(delta);
    }

    pub fn render(&self, renderer: &mut Renderer, viewport: &Rect, panic: bool) {
        if self.visible {
            self.sprite.render(renderer, viewport, panic);
        }
    }
}
