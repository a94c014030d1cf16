//! Dialogue text box
//!
//! Script-driven text box with typewriter reveal, an optional face, and a
//! question/answer mode. The box geometry itself rides the renderer's
//! amend/skip protocol; the text glyphs are drawn by the shell on top.

use std::cell::Cell;

use macroquad::prelude::Vec4;

use crate::input::{Button, Input};
use crate::util::Rect;
use crate::video::{BlendMode, BufferUsage, Layer, Program, Renderer, SCREEN_WIDTH, SINGLE_QUAD};

/// Characters per second when no explicit delay is set
const DEFAULT_RATE: f32 = 30.0;

const BOX_MARGIN: f32 = 8.0;
const BOX_HEIGHT: f32 = 56.0;

pub struct Dialogue {
    open: bool,
    high: bool,
    text: String,
    revealed: f32,
    delay: f32,
    face: Option<(usize, usize)>,
    question: Option<Vec<String>>,
    cursor: usize,
    answer: usize,
    amend: Cell<bool>,
}

impl Dialogue {
    pub fn new() -> Self {
        Self {
            open: false,
            high: false,
            text: String::new(),
            revealed: 0.0,
            delay: 1.0 / DEFAULT_RATE,
            face: None,
            question: None,
            cursor: 0,
            answer: 0,
            amend: Cell::new(false),
        }
    }

    pub fn open_textbox_high(&mut self) {
        self.open = true;
        self.high = true;
        self.clear_textbox();
        self.amend.set(true);
    }

    pub fn open_textbox_low(&mut self) {
        self.open = true;
        self.high = false;
        self.clear_textbox();
        self.amend.set(true);
    }

    /// Append a run of words to the box, restarting the reveal
    pub fn write_textbox(&mut self, words: &str) {
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(words);
    }

    pub fn clear_textbox(&mut self) {
        self.text.clear();
        self.revealed = 0.0;
    }

    pub fn close_textbox(&mut self) {
        self.open = false;
        self.question = None;
        self.clear_textbox();
        self.amend.set(true);
    }

    pub fn set_face(&mut self, face: Option<(usize, usize)>) {
        self.face = face;
    }

    pub fn face(&self) -> Option<(usize, usize)> {
        self.face
    }

    /// Per-character delay; `None` restores the default rate
    pub fn set_delay(&mut self, delay: Option<f32>) {
        self.delay = delay.unwrap_or(1.0 / DEFAULT_RATE);
    }

    /// Present a question; the box opens if it wasn't already
    pub fn ask_question(&mut self, options: Vec<String>) {
        if !self.open {
            self.open_textbox_low();
        }
        self.cursor = 0;
        self.question = Some(options);
    }

    pub fn get_answer(&self) -> usize {
        self.answer
    }

    pub fn open(&self) -> bool {
        self.open
    }

    pub fn high(&self) -> bool {
        self.high
    }

    /// Is the typewriter still revealing characters?
    pub fn writing(&self) -> bool {
        self.open && (self.revealed as usize) < self.text.chars().count()
    }

    /// Is a question blocking script execution?
    pub fn question(&self) -> bool {
        self.question.is_some()
    }

    pub fn question_options(&self) -> Option<&[String]> {
        self.question.as_deref()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Text revealed so far, for the shell's glyph pass
    pub fn visible_text(&self) -> String {
        self.text.chars().take(self.revealed as usize).collect()
    }

    pub fn update(&mut self, delta: f64) {
        if !self.open {
            return;
        }
        let total = self.text.chars().count() as f32;
        if self.revealed < total {
            if self.delay > 0.0 {
                self.revealed = (self.revealed + delta as f32 / self.delay).min(total);
            } else {
                self.revealed = total;
            }
        }
    }

    /// Question navigation; the confirm edge locks in the answer
    pub fn handle(&mut self, input: &Input) {
        let Some(options) = &self.question else {
            return;
        };
        let total = options.len();
        if total == 0 {
            self.question = None;
            return;
        }
        if input.pressed(Button::Up) && self.cursor > 0 {
            self.cursor -= 1;
        }
        if input.pressed(Button::Down) && self.cursor + 1 < total {
            self.cursor += 1;
        }
        if input.pressed(Button::Yes) {
            self.answer = self.cursor;
            self.question = None;
        }
    }

    pub fn box_rect(&self) -> Rect {
        let y = if self.high {
            BOX_MARGIN
        } else {
            crate::video::SCREEN_HEIGHT - BOX_HEIGHT - BOX_MARGIN
        };
        Rect::new(BOX_MARGIN, y, SCREEN_WIDTH - BOX_MARGIN * 2.0, BOX_HEIGHT)
    }

    /// Emit the box backdrop into the overlay pool
    pub fn render(&self, renderer: &mut Renderer) {
        if !self.open {
            return;
        }
        let panic = renderer.panicked();
        let rect = self.box_rect();
        let list = renderer.get_overlay_quads(
            Layer::HEADS_UP,
            BlendMode::Alpha,
            BufferUsage::Dynamic,
            Program::Colors,
            None,
            None,
        );
        if self.amend.replace(false) || panic {
            list.begin(SINGLE_QUAD)
                .vtx_blank_write(rect, Vec4::new(0.0, 0.0, 0.1, 0.8))
                .vtx_offset_write(rect.left_top())
                .end();
        } else {
            list.skip(SINGLE_QUAD);
        }
    }
}

impl Default for Dialogue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typewriter_reveal() {
        let mut dialogue = Dialogue::new();
        dialogue.open_textbox_low();
        dialogue.set_delay(Some(0.1));
        dialogue.write_textbox("hello");
        assert!(dialogue.writing());
        dialogue.update(0.25);
        assert_eq!(dialogue.visible_text(), "he");
        dialogue.update(1.0);
        assert_eq!(dialogue.visible_text(), "hello");
        assert!(!dialogue.writing());
    }

    #[test]
    fn test_question_flow() {
        let mut dialogue = Dialogue::new();
        dialogue.ask_question(vec!["yes".into(), "no".into()]);
        assert!(dialogue.question());
        let mut input = Input::new();
        input.inject(Button::Down);
        dialogue.handle(&input);
        assert_eq!(dialogue.cursor(), 1);
        input.settle();
        input.inject(Button::Yes);
        dialogue.handle(&input);
        assert!(!dialogue.question());
        assert_eq!(dialogue.get_answer(), 1);
    }

    #[test]
    fn test_render_rides_amend_protocol() {
        let mut dialogue = Dialogue::new();
        let mut renderer = Renderer::new();
        dialogue.open_textbox_low();
        dialogue.render(&mut renderer);
        let list = renderer.overlay_lists().next().unwrap();
        assert_eq!(list.written(), 1);
        assert!(list.amended());
        // Second frame with no changes replays via skip.
        let mut renderer = Renderer::new();
        dialogue.render(&mut renderer);
        let list = renderer.overlay_lists().next().unwrap();
        assert_eq!(list.written(), 1);
        assert!(!list.amended());
    }

    #[test]
    fn test_closed_box_emits_nothing() {
        let dialogue = Dialogue::new();
        let mut renderer = Renderer::new();
        dialogue.render(&mut renderer);
        assert_eq!(renderer.overlay_lists().count(), 0);
    }
}
