//! Scene: the actor registry
//!
//! Data-driven actors with simple kinematics and sprite components.
//! Everything here is glue the scripting surface drives: spawn, kill,
//! bump, animate. AI behavior proper lives in data tables outside the
//! core.

use macroquad::prelude::Vec2;

use super::hero::Hero;
use super::sprite::{Facing, Sprite};
use crate::assets::ResourceContext;
use crate::util::Rect;
use crate::video::Renderer;

pub struct Actor {
    pub id: i32,
    pub name: String,
    pub velocity: Vec2,
    pub sprite: Sprite,
    pub masks: u32,
}

pub struct Scene {
    actors: Vec<Actor>,
    pub hero: Hero,
}

impl Scene {
    pub fn new(ctx: &ResourceContext) -> Self {
        Self {
            actors: Vec::new(),
            hero: Hero::new(ctx),
        }
    }

    /// Spawn an actor whose sprite file shares its name. Nonzero ids must
    /// be unique; duplicates are refused.
    pub fn spawn(&mut self, ctx: &ResourceContext, name: &str, x: f32, y: f32, id: i32) -> bool {
        if id != 0 && self.actors.iter().any(|actor| actor.id == id) {
            println!("Warning! Actor id {id} already exists!");
            return false;
        }
        let mut sprite = Sprite::new(ctx.animation(name));
        sprite.set_position(Vec2::new(x, y));
        self.actors.push(Actor {
            id,
            name: name.to_string(),
            velocity: Vec2::ZERO,
            sprite,
            masks: 0,
        });
        true
    }

    /// Anonymous particle puffs
    pub fn smoke(&mut self, ctx: &ResourceContext, x: f32, y: f32, count: usize) {
        for _ in 0..count {
            self.spawn(ctx, "smoke", x, y, 0);
        }
    }

    pub fn shrapnel(&mut self, ctx: &ResourceContext, x: f32, y: f32, count: usize) {
        for _ in 0..count {
            self.spawn(ctx, "shrapnel", x, y, 0);
        }
    }

    fn actor_mut(&mut self, id: i32) -> Option<&mut Actor> {
        self.actors.iter_mut().find(|actor| actor.id == id)
    }

    fn actor(&self, id: i32) -> Option<&Actor> {
        self.actors.iter().find(|actor| actor.id == id)
    }

    pub fn actor_position(&self, id: i32) -> Option<Vec2> {
        self.actor(id).map(|actor| actor.sprite.position)
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Kill with effects: the actor goes away in a puff of smoke
    pub fn kill(&mut self, ctx: &ResourceContext, id: i32) {
        if let Some(position) = self.actor_position(id) {
            self.actors.retain(|actor| actor.id != id);
            self.smoke(ctx, position.x, position.y, 2);
        }
    }

    /// Remove without ceremony
    pub fn destroy(&mut self, id: i32) {
        self.actors.retain(|actor| actor.id != id);
    }

    pub fn bump(&mut self, id: i32, velocity_x: f32, velocity_y: f32) {
        if let Some(actor) = self.actor_mut(id) {
            actor.velocity = Vec2::new(velocity_x, velocity_y);
        }
    }

    pub fn animate(&mut self, id: i32, state: usize, variation: usize) {
        if let Some(actor) = self.actor_mut(id) {
            actor.sprite.new_state(state);
            actor.sprite.set_facing(Facing::Variation(variation));
        }
    }

    pub fn set_state(&mut self, id: i32, state: usize) {
        if let Some(actor) = self.actor_mut(id) {
            actor.sprite.new_state(state);
        }
    }

    pub fn set_mask(&mut self, id: i32, flag: u32, value: bool) {
        if let Some(actor) = self.actor_mut(id) {
            if value {
                actor.masks |= 1 << flag;
            } else {
                actor.masks &= !(1 << flag);
            }
        }
    }

    pub fn get_mask(&self, id: i32, flag: u32) -> bool {
        self.actor(id)
            .map(|actor| actor.masks & (1 << flag) != 0)
            .unwrap_or(false)
    }

    /// Has the actor come to rest?
    pub fn still(&self, id: i32) -> bool {
        self.actor(id)
            .map(|actor| actor.velocity.length_squared() < f32::EPSILON)
            .unwrap_or(true)
    }

    /// Drop every actor (scene transition); the hero persists
    pub fn clear(&mut self) {
        self.actors.clear();
    }

    pub fn update(&mut self, delta: f64) {
        self.hero.update(delta);
        for actor in &mut self.actors {
            if actor.velocity != Vec2::ZERO {
                let position = actor.sprite.position + actor.velocity * delta as f32;
                actor.sprite.set_position(position);
            }
            actor.sprite.update(delta);
        }
        // Finished one-shot particles clean themselves up.
        self.actors
            .retain(|actor| actor.id != 0 || !actor.sprite.finished());
    }

    /// Render hero and actors in layer order
    pub fn render(&self, renderer: &mut Renderer, viewport: &Rect, panic: bool) {
        let mut sprites: Vec<&Sprite> = self.actors.iter().map(|actor| &actor.sprite).collect();
        sprites.push(&self.hero.sprite);
        sprites.sort_by_key(|sprite| sprite.layer);
        for sprite in sprites {
            if std::ptr::eq(sprite, &self.hero.sprite) {
                self.hero.render(renderer, viewport, panic);
            } else {
                sprite.render(renderer, viewport, panic);
            }
        }
    }
}
