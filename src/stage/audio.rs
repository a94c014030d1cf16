//! Audio and music transport
//!
//! Thin wrappers over macroquad's audio that satisfy the scripting
//! surface. Sounds and tunes are registered by the shell at startup;
//! missing entries degrade to a log line so scripts keep running on
//! machines without the asset pack.

use std::collections::HashMap;

use macroquad::audio::{play_sound, stop_sound, PlaySoundParams, Sound};

pub struct Audio {
    volume: f32,
    sounds: HashMap<String, Sound>,
    paused_channels: Vec<usize>,
}

impl Audio {
    pub fn new(volume: f32) -> Self {
        Self {
            volume,
            sounds: HashMap::new(),
            paused_channels: Vec::new(),
        }
    }

    /// Register a decoded sound under its script-facing name
    pub fn insert(&mut self, name: &str, sound: Sound) {
        self.sounds.insert(name.to_string(), sound);
    }

    pub fn play(&mut self, id: &str, channel: Option<usize>) {
        if let Some(channel) = channel {
            if self.paused_channels.contains(&channel) {
                return;
            }
        }
        match self.sounds.get(id) {
            Some(sound) => play_sound(
                sound,
                PlaySoundParams {
                    looped: false,
                    volume: self.volume,
                },
            ),
            None => println!("Couldn't find noise \"{id}\"!"),
        }
    }

    pub fn pause(&mut self, channel: usize) {
        if !self.paused_channels.contains(&channel) {
            self.paused_channels.push(channel);
        }
    }

    pub fn resume(&mut self, channel: usize) {
        self.paused_channels.retain(|c| *c != channel);
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn get_volume(&self) -> f32 {
        self.volume
    }
}

/// Looping tune transport. Tracks play state even when the backing sound
/// isn't registered, so scripted music cues stay consistent.
pub struct Music {
    volume: f32,
    looping: bool,
    playing: bool,
    current: Option<String>,
    tunes: HashMap<String, Sound>,
    fade_timer: f64,
}

impl Music {
    pub fn new(volume: f32) -> Self {
        Self {
            volume,
            looping: true,
            playing: false,
            current: None,
            tunes: HashMap::new(),
            fade_timer: 0.0,
        }
    }

    pub fn insert(&mut self, name: &str, sound: Sound) {
        self.tunes.insert(name.to_string(), sound);
    }

    /// Switch to a tune and start it. Unknown tunes still become current
    /// (silently) so `playing()` reflects the script's intent.
    pub fn load(&mut self, tune: &str) -> bool {
        self.stop_backend();
        self.current = Some(tune.to_string());
        self.fade_timer = 0.0;
        self.play(0.0, 0.0);
        if !self.tunes.contains_key(tune) {
            println!("Couldn't find tune \"{tune}\"!");
            return false;
        }
        true
    }

    pub fn clear(&mut self) {
        self.stop_backend();
        self.current = None;
        self.playing = false;
        self.fade_timer = 0.0;
    }

    pub fn play(&mut self, _start: f32, _fade: f32) {
        self.playing = true;
        self.fade_timer = 0.0;
        if let Some(sound) = self.current.as_ref().and_then(|name| self.tunes.get(name)) {
            play_sound(
                sound,
                PlaySoundParams {
                    looped: self.looping,
                    volume: self.volume,
                },
            );
        }
    }

    pub fn pause(&mut self) {
        self.playing = false;
        self.stop_backend();
    }

    pub fn fade_out(&mut self, seconds: f32) {
        if self.playing {
            self.fade_timer = seconds as f64;
        }
    }

    pub fn resume(&mut self, _seconds: f32) {
        if !self.playing && self.current.is_some() {
            self.play(0.0, 0.0);
        }
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn running(&self) -> bool {
        self.playing
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn get_volume(&self) -> f32 {
        self.volume
    }

    pub fn update(&mut self, delta: f64) {
        if self.fade_timer > 0.0 {
            self.fade_timer -= delta;
            if self.fade_timer <= 0.0 {
                self.pause();
            }
        }
    }

    fn stop_backend(&mut self) {
        if let Some(sound) = self.current.as_ref().and_then(|name| self.tunes.get(name)) {
            stop_sound(sound);
        }
    }
}
