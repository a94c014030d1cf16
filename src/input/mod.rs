//! Action-based input
//!
//! Keyboard state is polled once per frame into pressed/held masks over
//! engine actions. The confirm press edge is what releases a stalled
//! script, so the edge detection here is part of the scripting contract.

use macroquad::prelude::{is_key_down, is_key_pressed, KeyCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Jump,
    Hammer,
    Item,
    Dash,
    Strafe,
    Inventory,
    Options,
    Up,
    Down,
    Left,
    Right,
    /// Confirm (shares the jump key plus Enter)
    Yes,
    /// Cancel (shares the hammer key)
    No,
}

const TOTAL: usize = 13;

impl Button {
    pub fn from_index(index: usize) -> Option<Self> {
        const ALL: [Button; TOTAL] = [
            Button::Jump,
            Button::Hammer,
            Button::Item,
            Button::Dash,
            Button::Strafe,
            Button::Inventory,
            Button::Options,
            Button::Up,
            Button::Down,
            Button::Left,
            Button::Right,
            Button::Yes,
            Button::No,
        ];
        ALL.get(index).copied()
    }

    fn index(self) -> usize {
        match self {
            Button::Jump => 0,
            Button::Hammer => 1,
            Button::Item => 2,
            Button::Dash => 3,
            Button::Strafe => 4,
            Button::Inventory => 5,
            Button::Options => 6,
            Button::Up => 7,
            Button::Down => 8,
            Button::Left => 9,
            Button::Right => 10,
            Button::Yes => 11,
            Button::No => 12,
        }
    }

    fn keys(self) -> &'static [KeyCode] {
        match self {
            Button::Jump => &[KeyCode::Z],
            Button::Hammer => &[KeyCode::X],
            Button::Item => &[KeyCode::LeftShift],
            Button::Dash => &[KeyCode::A],
            Button::Strafe => &[KeyCode::LeftControl],
            Button::Inventory => &[KeyCode::Tab],
            Button::Options => &[KeyCode::Escape],
            Button::Up => &[KeyCode::Up],
            Button::Down => &[KeyCode::Down],
            Button::Left => &[KeyCode::Left],
            Button::Right => &[KeyCode::Right],
            Button::Yes => &[KeyCode::Z, KeyCode::Enter],
            Button::No => &[KeyCode::X],
        }
    }
}

#[derive(Default)]
pub struct Input {
    pressed: [bool; TOTAL],
    holding: [bool; TOTAL],
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the keyboard into this frame's masks
    pub fn poll(&mut self) {
        for index in 0..TOTAL {
            let button = Button::from_index(index).unwrap_or(Button::Jump);
            self.pressed[index] = button.keys().iter().any(|key| is_key_pressed(*key));
            self.holding[index] = button.keys().iter().any(|key| is_key_down(*key));
        }
    }

    /// Press edge this frame
    pub fn pressed(&self, button: Button) -> bool {
        self.pressed[button.index()]
    }

    pub fn held(&self, button: Button) -> bool {
        self.holding[button.index()]
    }

    /// Feed a synthetic press edge, for tests and demo automation
    pub fn inject(&mut self, button: Button) {
        self.pressed[button.index()] = true;
        self.holding[button.index()] = true;
    }

    /// Drop the edge bits at the end of a frame driven by `inject`
    pub fn settle(&mut self) {
        self.pressed = [false; TOTAL];
    }
}
