//! Stage collaborators
//!
//! The concrete game-side surfaces the scripting bridge and renderer talk
//! to: kernel progress state, dialogue box, heads-up overlay, menu stack,
//! camera, scene/actors, and the audio transports. Everything is shared
//! behind `Rc<RefCell>` so registered native functions can reach it.

mod audio;
mod camera;
mod dialogue;
mod headsup;
mod hero;
mod kernel;
mod menu;
mod scene;
mod sprite;

pub use audio::{Audio, Music};
pub use camera::Camera;
pub use dialogue::Dialogue;
pub use headsup::Headsup;
pub use hero::Hero;
pub use kernel::{ItemSlot, Kernel, Transfer, MAX_ITEMS};
pub use menu::MenuStack;
pub use scene::{Actor, Scene};
pub use sprite::{Direction, Facing, Sprite, NON_STATE};

use std::cell::RefCell;
use std::rc::Rc;

use crate::assets::ResourceContext;
use crate::input::Input;
use crate::video::Renderer;

/// Shared handles to every collaborator the native surface needs
pub struct Stage {
    pub kernel: Rc<RefCell<Kernel>>,
    pub dialogue: Rc<RefCell<Dialogue>>,
    pub headsup: Rc<RefCell<Headsup>>,
    pub menu: Rc<RefCell<MenuStack>>,
    pub camera: Rc<RefCell<Camera>>,
    pub scene: Rc<RefCell<Scene>>,
    pub audio: Rc<RefCell<Audio>>,
    pub music: Rc<RefCell<Music>>,
    pub input: Rc<RefCell<Input>>,
}

impl Stage {
    pub fn new(ctx: &ResourceContext) -> Self {
        Self {
            kernel: Rc::new(RefCell::new(Kernel::new())),
            dialogue: Rc::new(RefCell::new(Dialogue::new())),
            headsup: Rc::new(RefCell::new(Headsup::new())),
            menu: Rc::new(RefCell::new(MenuStack::new())),
            camera: Rc::new(RefCell::new(Camera::new())),
            scene: Rc::new(RefCell::new(Scene::new(ctx))),
            audio: Rc::new(RefCell::new(Audio::new(1.0))),
            music: Rc::new(RefCell::new(Music::new(0.34))),
            input: Rc::new(RefCell::new(Input::new())),
        }
    }

    /// Advance every collaborator by one tick
    pub fn update(&self, delta: f64) {
        self.headsup.borrow_mut().update(delta);
        self.dialogue.borrow_mut().update(delta);
        self.music.borrow_mut().update(delta);
        {
            let mut scene = self.scene.borrow_mut();
            if !self.kernel.borrow().frozen() {
                scene.update(delta);
            }
            self.camera.borrow_mut().update(delta, &scene);
        }
    }

    /// Question navigation runs before the receiver so an answered
    /// question unblocks script execution the same frame
    pub fn handle(&self) {
        let input = self.input.borrow();
        self.dialogue.borrow_mut().handle(&input);
    }

    /// Emit all stage geometry into the renderer
    pub fn render(&self, renderer: &mut Renderer) {
        let viewport = self.camera.borrow().viewport();
        renderer.set_viewport(viewport);
        let panic = renderer.panicked();
        self.scene.borrow().render(renderer, &viewport, panic);
        self.dialogue.borrow().render(renderer);
        self.headsup.borrow_mut().render(renderer);
    }
}
