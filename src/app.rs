//! Application shell
//!
//! Wires input polling, the scripting receiver, the stage, and the
//! renderer into one frame loop, and services buffered field transfers
//! and reboots at frame boundaries. Text glyphs (dialogue, title cards)
//! ride macroquad's text pipeline after the quad passes have flushed.

use macroquad::prelude::*;
use serde::{Deserialize, Serialize};

use crate::assets::ResourceContext;
use crate::script::{Loading, Receiver};
use crate::stage::Stage;
use crate::video::{Gfx, Renderer, SCREEN_HEIGHT, SCREEN_WIDTH};

/// Boot configuration, stored as `init/boot.ron` in the data directory.
/// A missing file is regenerated with defaults, matching first-run use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub language: String,
    pub volume: f32,
    pub music_volume: f32,
    pub scale: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            language: "english".to_string(),
            volume: 1.0,
            music_volume: 0.34,
            scale: 3.0,
        }
    }
}

impl Config {
    pub fn load(resources: &ResourceContext) -> Self {
        let path = resources.root().join("init").join("boot.ron");
        match std::fs::read_to_string(&path) {
            Ok(source) => match ron::from_str(&source) {
                Ok(config) => config,
                Err(e) => {
                    println!("Couldn't parse config file \"{}\": {e}", path.display());
                    Self::default()
                }
            },
            Err(_) => {
                println!("Couldn't find main configuration file, generating a new one...");
                let config = Self::default();
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                match ron::to_string(&config) {
                    Ok(serialized) => {
                        if let Err(e) = std::fs::write(&path, serialized) {
                            println!("Couldn't save newly generated config file: {e}");
                        }
                    }
                    Err(e) => println!("Couldn't serialize default config: {e}"),
                }
                config
            }
        }
    }
}

pub struct App {
    stage: Stage,
    receiver: Receiver,
    renderer: Renderer,
    gfx: Gfx,
    booted: bool,
}

impl App {
    pub fn new(resources: ResourceContext, config: &Config) -> Option<Self> {
        let gfx = match Gfx::new() {
            Ok(gfx) => gfx,
            Err(e) => {
                println!("Graphics initialization failed! {e}");
                return None;
            }
        };
        request_new_screen_size(SCREEN_WIDTH * config.scale, SCREEN_HEIGHT * config.scale);
        let stage = Stage::new(&resources);
        stage.audio.borrow_mut().set_volume(config.volume);
        stage.music.borrow_mut().set_volume(config.music_volume);
        let mut receiver = Receiver::new();
        if !receiver.init(&resources, &stage) {
            println!("Receiver initialization failed!");
            return None;
        }
        Some(Self {
            stage,
            receiver,
            renderer: Renderer::new(),
            gfx,
            booted: false,
        })
    }

    pub fn viable(&self) -> bool {
        !self.stage.kernel.borrow().quitting()
    }

    /// Per-frame logic: poll input, service transfers, drive the receiver
    pub fn handle(&mut self) {
        self.stage.input.borrow_mut().poll();
        if self.stage.kernel.borrow_mut().take_reboot() {
            self.receiver.reset();
            self.stage.scene.borrow_mut().clear();
            self.renderer.recycle();
            self.booted = false;
        }
        if !self.booted {
            self.booted = true;
            self.receiver.run_function(&self.stage);
        }
        let transfer = self.stage.kernel.borrow_mut().take_transfer();
        if let Some(transfer) = transfer {
            self.receiver.reset();
            self.stage.scene.borrow_mut().clear();
            self.renderer.recycle();
            if self.receiver.load(&transfer.field, Loading::Normal) {
                self.receiver.run_function(&self.stage);
            }
        }
        self.stage.handle();
        self.receiver.handle(&self.stage);
    }

    pub fn update(&mut self, delta: f64) {
        self.receiver.update(delta);
        self.stage.update(delta);
    }

    pub fn render(&mut self) {
        clear_background(BLACK);
        self.stage.render(&mut self.renderer);
        self.renderer.flush(&mut self.gfx);
        self.draw_text_overlays();
    }

    /// Dialogue text, question options, title cards, and the field label
    /// are drawn with macroquad's text pipeline on top of the quad passes.
    fn draw_text_overlays(&self) {
        let scale = screen_width() / SCREEN_WIDTH;
        let font_size = 8.0 * scale;
        let dialogue = self.stage.dialogue.borrow();
        if dialogue.open() {
            let rect = dialogue.box_rect();
            let mut line_y = (rect.y + 12.0) * scale;
            for line in dialogue.visible_text().lines() {
                draw_text(line, (rect.x + 6.0) * scale, line_y, font_size, WHITE);
                line_y += 10.0 * scale;
            }
            if let Some(options) = dialogue.question_options() {
                for (index, option) in options.iter().enumerate() {
                    let marker = if index == dialogue.cursor() { "> " } else { "  " };
                    draw_text(
                        &format!("{marker}{option}"),
                        (rect.x + 16.0) * scale,
                        line_y,
                        font_size,
                        WHITE,
                    );
                    line_y += 10.0 * scale;
                }
            }
        }
        let headsup = self.stage.headsup.borrow();
        for card in headsup.cards() {
            let mut x = card.position.x * scale;
            let y = card.position.y * scale;
            if card.centered.0 {
                let measured = measure_text(&card.text, None, font_size as u16, 1.0);
                x -= measured.width * 0.5;
            }
            draw_text(&card.text, x, y, font_size, WHITE);
        }
        if let Some(text) = headsup.field_text() {
            draw_text(text, 8.0 * scale, 12.0 * scale, font_size, WHITE);
        }
    }
}
