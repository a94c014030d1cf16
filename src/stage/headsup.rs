//! Heads-up overlay: screen fade and title cards
//!
//! The fade quad blocks script execution while it moves, and while held
//! fully black it is captured so a scene transition's list recycling
//! leaves it on screen. Title cards are script-authored text the shell
//! draws on top of everything.

use std::cell::Cell;

use macroquad::prelude::{Vec2, Vec4};

use crate::util::Rect;
use crate::video::{
    BlendMode, BufferUsage, DisplayList, Layer, Program, Renderer, SCREEN_HEIGHT, SCREEN_WIDTH,
    SINGLE_QUAD,
};

/// Fade speed in alpha per second
const FADE_SPEED: f32 = 2.5;

pub struct Card {
    pub text: String,
    pub font: usize,
    pub position: Vec2,
    pub centered: (bool, bool),
}

pub struct Headsup {
    fade: f32,
    target: f32,
    amend: Cell<bool>,
    token: i64,
    cards: Vec<Card>,
    field_text: Option<String>,
}

impl Headsup {
    pub fn new() -> Self {
        Self {
            fade: 0.0,
            target: 0.0,
            amend: Cell::new(false),
            token: 0,
            cards: Vec::new(),
            field_text: None,
        }
    }

    pub fn fade_in(&mut self) {
        self.target = 0.0;
    }

    pub fn fade_out(&mut self) {
        self.target = 1.0;
    }

    /// Scripts stay blocked while the fade is in motion
    pub fn is_fade_moving(&self) -> bool {
        (self.fade - self.target).abs() > f32::EPSILON
    }

    pub fn fade_value(&self) -> f32 {
        self.fade
    }

    pub fn set_field_text(&mut self, text: Option<String>) {
        self.field_text = text;
    }

    pub fn field_text(&self) -> Option<&str> {
        self.field_text.as_deref()
    }

    pub fn push_card(&mut self, text: &str, font: usize) {
        self.cards.push(Card {
            text: text.to_string(),
            font,
            position: Vec2::new(SCREEN_WIDTH * 0.5, SCREEN_HEIGHT * 0.5),
            centered: (true, true),
        });
    }

    pub fn clear_cards(&mut self) {
        self.cards.clear();
    }

    pub fn set_card_position(&mut self, index: usize, x: f32, y: f32) {
        if let Some(card) = self.cards.get_mut(index) {
            card.position = Vec2::new(x, y);
        }
    }

    pub fn set_card_centered(&mut self, index: usize, x: bool, y: bool) {
        if let Some(card) = self.cards.get_mut(index) {
            card.centered = (x, y);
        }
    }

    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    pub fn update(&mut self, delta: f64) {
        if self.is_fade_moving() {
            let step = FADE_SPEED * delta as f32;
            if self.fade < self.target {
                self.fade = (self.fade + step).min(self.target);
            } else {
                self.fade = (self.fade - step).max(self.target);
            }
            self.amend.set(true);
        }
    }

    fn write_fade(list: &mut DisplayList, fade: f32, amend: bool) {
        if amend {
            list.begin(SINGLE_QUAD)
                .vtx_blank_write(
                    Rect::new(0.0, 0.0, SCREEN_WIDTH, SCREEN_HEIGHT),
                    Vec4::new(0.0, 0.0, 0.0, fade),
                )
                .vtx_offset_write(Vec2::ZERO)
                .end();
        } else {
            list.skip(SINGLE_QUAD);
        }
    }

    /// Emit the fade quad. A fade held at full black captures its list so
    /// it survives the transition's recycle pass; fading back in releases
    /// the capture.
    pub fn render(&mut self, renderer: &mut Renderer) {
        let panic = renderer.panicked();
        if self.fade <= 0.0 {
            if self.token != 0 {
                renderer.release(self.token);
                self.token = 0;
            }
            return;
        }
        let amend = self.amend.replace(false) || panic;
        if self.token != 0 {
            if let Some(list) = renderer.get_captured(self.token) {
                Self::write_fade(list, self.fade, amend);
                return;
            }
            // The capture went away underneath us; fall through and rebuild.
            self.token = 0;
        }
        let hold = self.fade >= 1.0 && self.target >= 1.0;
        let list = renderer.get_overlay_quads(
            Layer::FADE,
            BlendMode::Alpha,
            BufferUsage::Dynamic,
            Program::Colors,
            None,
            None,
        );
        Self::write_fade(list, self.fade, amend);
        if hold {
            self.token = list.capture();
        }
    }
}

impl Default for Headsup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fade_motion_blocks_and_settles() {
        let mut headsup = Headsup::new();
        assert!(!headsup.is_fade_moving());
        headsup.fade_out();
        assert!(headsup.is_fade_moving());
        headsup.update(1.0);
        assert!(!headsup.is_fade_moving());
        assert_eq!(headsup.fade_value(), 1.0);
        headsup.fade_in();
        headsup.update(0.2);
        assert!(headsup.is_fade_moving());
        headsup.update(10.0);
        assert_eq!(headsup.fade_value(), 0.0);
    }

    #[test]
    fn test_held_fade_survives_recycle() {
        let mut headsup = Headsup::new();
        let mut renderer = Renderer::new();
        headsup.fade_out();
        headsup.update(1.0);
        headsup.render(&mut renderer);
        // Fully black and held: the list is captured.
        assert_eq!(renderer.overlay_lists().count(), 1);
        assert!(renderer.overlay_lists().next().unwrap().persists());
        renderer.recycle();
        assert_eq!(renderer.overlay_lists().count(), 1);
        // Fading back in releases the capture once clear.
        headsup.fade_in();
        headsup.update(10.0);
        headsup.render(&mut renderer);
        assert!(!renderer.overlay_lists().next().unwrap().persists());
    }

    #[test]
    fn test_cards() {
        let mut headsup = Headsup::new();
        headsup.push_card("Chapter One", 0);
        headsup.set_card_position(0, 20.0, 30.0);
        headsup.set_card_centered(0, false, false);
        assert_eq!(headsup.cards().len(), 1);
        assert_eq!(headsup.cards()[0].position, Vec2::new(20.0, 30.0));
        headsup.clear_cards();
        assert!(headsup.cards().is_empty());
    }
}
