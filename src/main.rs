//! VESPER: a scriptable 2D action game engine
//!
//! The core is a deferred quad-batch renderer (display lists keyed by
//! draw state, rebuilt only when dirty) married to a Lua scripting
//! bridge that runs game-event scripts as budgeted coroutines. Game
//! data - sprites, fields, text, scripts - lives in a mounted data
//! directory.

/// Version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

mod app;
mod assets;
mod input;
mod script;
mod stage;
mod util;
mod video;

use macroquad::prelude::*;

use app::{App, Config};
use assets::ResourceContext;

fn window_conf() -> Conf {
    Conf {
        window_title: format!("Vesper v{VERSION}"),
        window_width: 960,
        window_height: 540,
        window_resizable: true,
        high_dpi: true,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    // The data directory can be passed as the first argument, with the
    // working directory as the fallback mount.
    let directory = std::env::args().nth(1).unwrap_or_else(|| "data".to_string());
    let Some(resources) = ResourceContext::mount(&directory) else {
        println!("Fatal error! Could not mount the data directory!");
        return;
    };
    let config = Config::load(&resources);
    if !resources.try_language(&config.language) {
        println!("Falling back to untranslated text.");
    }
    let Some(mut app) = App::new(resources, &config) else {
        return;
    };
    println!("Entering main loop...");
    while app.viable() {
        app.handle();
        app.update(get_frame_time() as f64);
        app.render();
        next_frame().await;
    }
    println!("Shutting down.");
}
