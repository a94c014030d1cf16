//! Native function surface
//!
//! The fixed catalogue of namespaced entry points scripts call into,
//! registered once at receiver init, before any module compiles. The
//! signatures are part of the wire contract with script source text;
//! changing one means recompiling every module.

use mlua::{Function, Lua, Value};

use super::receiver::{load_module, Loading, PendingYield, ScriptHooks};
use crate::assets::ResourceContext;
use crate::input::Button;
use crate::stage::Stage;

/// Lua-side glue for the suspension primitives: a native cannot yield the
/// coroutine itself, so each one records its request and the wrapper
/// performs the actual yield.
const SUSPEND_GLUE: &str = r#"
local yield = coroutine.yield
function sys.wait(seconds)
    if seconds == nil then
        __stall()
    else
        __wait(seconds)
    end
    return yield()
end
function sys.suspend()
    __suspend()
    return yield()
end
"#;

pub(crate) fn register(
    lua: &Lua,
    resources: &ResourceContext,
    stage: &Stage,
    hooks: &ScriptHooks,
) -> mlua::Result<()> {
    let globals = lua.globals();

    register_sys(lua, resources, stage, hooks)?;
    register_msg(lua, stage)?;
    register_audio(lua, stage)?;
    register_scene(lua, resources, stage, hooks)?;
    register_hero(lua, stage)?;
    register_camera(lua, stage)?;

    // Module import resolution: loads the exporting module on first use
    // and records the import edge for the unload-on-idle policy.
    let import_resources = resources.clone();
    let import_modules = hooks.modules.clone();
    let import = lua.create_function(move |lua, name: String| {
        let importer = import_modules.borrow().loading.last().cloned();
        let loaded = import_modules.borrow().get(&name).is_some()
            || load_module(lua, &import_resources, &import_modules, &name, Loading::Import);
        if let Some(importer) = importer {
            import_modules
                .borrow_mut()
                .imports
                .entry(importer)
                .or_default()
                .insert(name.clone());
        }
        if !loaded {
            return Err(mlua::Error::RuntimeError(format!(
                "couldn't import module '{name}'"
            )));
        }
        Ok(import_modules.borrow().get(&name))
    })?;
    globals.set("import", import)?;

    lua.load(SUSPEND_GLUE).exec()
}

fn register_sys(
    lua: &Lua,
    resources: &ResourceContext,
    stage: &Stage,
    hooks: &ScriptHooks,
) -> mlua::Result<()> {
    let sys = lua.create_table()?;

    sys.set(
        "print",
        lua.create_function(|_, statement: String| {
            println!("{statement}");
            Ok(())
        })?,
    )?;

    // Suspension primitives; sys.wait/sys.suspend wrap these in Lua.
    let pending = hooks.pending.clone();
    lua.globals().set(
        "__wait",
        lua.create_function(move |_, seconds: f32| {
            *pending.borrow_mut() = PendingYield::Wait(seconds);
            Ok(())
        })?,
    )?;
    let pending = hooks.pending.clone();
    lua.globals().set(
        "__stall",
        lua.create_function(move |_, ()| {
            *pending.borrow_mut() = PendingYield::Stall;
            Ok(())
        })?,
    )?;
    let pending = hooks.pending.clone();
    lua.globals().set(
        "__suspend",
        lua.create_function(move |_, ()| {
            *pending.borrow_mut() = PendingYield::Suspend;
            Ok(())
        })?,
    )?;

    let kernel = stage.kernel.clone();
    sys.set(
        "get_flag",
        lua.create_function(move |_, index: usize| Ok(kernel.borrow().get_flag(index)))?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "set_flag",
        lua.create_function(move |_, (index, value): (usize, bool)| {
            kernel.borrow_mut().set_flag(index, value);
            Ok(())
        })?,
    )?;

    let kernel = stage.kernel.clone();
    sys.set(
        "set_item",
        lua.create_function(
            move |_, (kind, count, limit, optor): (i32, i32, i32, i32)| {
                kernel.borrow_mut().set_item(kind, count, limit, optor);
                Ok(())
            },
        )?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "set_item_limit",
        lua.create_function(move |_, (kind, limit): (i32, i32)| {
            kernel.borrow_mut().set_item_limit(kind, limit);
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "set_item_optor",
        lua.create_function(move |_, (kind, optor): (i32, i32)| {
            kernel.borrow_mut().set_item_optor(kind, optor);
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "add_item",
        lua.create_function(move |_, (kind, count, limit): (i32, i32, i32)| {
            kernel.borrow_mut().add_item(kind, count, limit);
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "sub_item",
        lua.create_function(move |_, (kind, count): (i32, i32)| {
            kernel.borrow_mut().sub_item(kind, count);
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "rid_item",
        lua.create_function(move |_, kind: i32| {
            kernel.borrow_mut().rid_item(kind);
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "get_item_count",
        lua.create_function(move |_, kind: i32| Ok(kernel.borrow().get_item_count(kind)))?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "set_item_ptr_index",
        lua.create_function(move |_, index: Option<usize>| {
            kernel.borrow_mut().set_item_ptr_index(index);
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "get_item_ptr_index",
        lua.create_function(move |_, ()| {
            Ok(kernel
                .borrow()
                .get_item_ptr_index()
                .map(|index| index as i64)
                .unwrap_or(-1))
        })?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "get_max_items",
        lua.create_function(move |_, ()| Ok(kernel.borrow().get_max_items()))?,
    )?;

    let kernel = stage.kernel.clone();
    sys.set(
        "lock",
        lua.create_function(move |_, ()| {
            kernel.borrow_mut().lock();
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "freeze",
        lua.create_function(move |_, ()| {
            kernel.borrow_mut().freeze();
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "unlock",
        lua.create_function(move |_, ()| {
            kernel.borrow_mut().unlock();
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "boot",
        lua.create_function(move |_, ()| {
            kernel.borrow_mut().boot();
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "quit",
        lua.create_function(move |_, ()| {
            kernel.borrow_mut().quit();
            Ok(())
        })?,
    )?;

    let kernel = stage.kernel.clone();
    sys.set(
        "set_field",
        lua.create_function(
            move |_, (field, id, event): (String, i32, Option<Function>)| {
                kernel.borrow_mut().buffer_field(&field, id, event);
                Ok(())
            },
        )?,
    )?;

    let kernel = stage.kernel.clone();
    let ctx = resources.clone();
    sys.set(
        "load_progress",
        lua.create_function(move |_, ()| {
            kernel.borrow_mut().load_progress(&ctx);
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    let ctx = resources.clone();
    sys.set(
        "save_progress",
        lua.create_function(move |_, ()| {
            kernel.borrow().save_progress(&ctx);
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    let ctx = resources.clone();
    sys.set(
        "load_checkpoint",
        lua.create_function(move |_, ()| {
            kernel.borrow_mut().load_checkpoint(&ctx);
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    let ctx = resources.clone();
    sys.set(
        "save_checkpoint",
        lua.create_function(move |_, ()| {
            kernel.borrow().save_checkpoint(&ctx);
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "set_file_index",
        lua.create_function(move |_, index: usize| {
            kernel.borrow_mut().set_file_index(index);
            Ok(())
        })?,
    )?;
    let kernel = stage.kernel.clone();
    sys.set(
        "get_file_index",
        lua.create_function(move |_, ()| Ok(kernel.borrow().get_file_index()))?,
    )?;

    sys.set(
        "get_rand",
        lua.create_function(|_, (lowest, highest): (Value, Value)| {
            if let (Value::Integer(lowest), Value::Integer(highest)) = (&lowest, &highest) {
                let (low, high) = (*lowest.min(highest) as i32, *lowest.max(highest) as i32);
                return Ok(Value::Integer(
                    macroquad::rand::gen_range(low, high + 1) as i64
                ));
            }
            let (Some(lowest), Some(highest)) = (value_to_f32(&lowest), value_to_f32(&highest))
            else {
                return Err(mlua::Error::RuntimeError(
                    "get_rand expects two numbers".to_string(),
                ));
            };
            let (low, high) = (lowest.min(highest), lowest.max(highest));
            Ok(Value::Number(
                macroquad::rand::gen_range(low, high) as f64
            ))
        })?,
    )?;

    let input = stage.input.clone();
    sys.set(
        "get_key_press",
        lua.create_function(move |_, action: usize| {
            Ok(Button::from_index(action)
                .map(|button| input.borrow().pressed(button))
                .unwrap_or(false))
        })?,
    )?;
    let input = stage.input.clone();
    sys.set(
        "get_key_held",
        lua.create_function(move |_, action: usize| {
            Ok(Button::from_index(action)
                .map(|button| input.borrow().held(button))
                .unwrap_or(false))
        })?,
    )?;

    let ctx = resources.clone();
    sys.set(
        "locale",
        lua.create_function(move |_, (key, index): (String, usize)| {
            Ok(ctx.locale_find(&key, index))
        })?,
    )?;
    let ctx = resources.clone();
    sys.set(
        "locale_size",
        lua.create_function(move |_, key: String| Ok(ctx.locale_size(&key)))?,
    )?;

    let menu = stage.menu.clone();
    sys.set(
        "push_widget",
        lua.create_function(move |_, (kind, flags): (i64, i64)| {
            menu.borrow_mut().push(kind, flags);
            Ok(())
        })?,
    )?;
    let menu = stage.menu.clone();
    sys.set(
        "pop_widget",
        lua.create_function(move |_, ()| {
            menu.borrow_mut().pop();
            Ok(())
        })?,
    )?;

    lua.globals().set("sys", sys)
}

fn value_to_f32(value: &Value) -> Option<f32> {
    match value {
        Value::Integer(value) => Some(*value as f32),
        Value::Number(value) => Some(*value as f32),
        _ => None,
    }
}

fn register_msg(lua: &Lua, stage: &Stage) -> mlua::Result<()> {
    let msg = lua.create_table()?;

    let headsup = stage.headsup.clone();
    msg.set(
        "fade_in",
        lua.create_function(move |_, ()| {
            headsup.borrow_mut().fade_in();
            Ok(())
        })?,
    )?;
    let headsup = stage.headsup.clone();
    msg.set(
        "fade_out",
        lua.create_function(move |_, ()| {
            headsup.borrow_mut().fade_out();
            Ok(())
        })?,
    )?;
    let headsup = stage.headsup.clone();
    msg.set(
        "set_field_text",
        lua.create_function(move |_, text: Option<String>| {
            headsup.borrow_mut().set_field_text(text);
            Ok(())
        })?,
    )?;
    let headsup = stage.headsup.clone();
    msg.set(
        "push_card",
        lua.create_function(move |_, (text, font): (String, usize)| {
            headsup.borrow_mut().push_card(&text, font);
            Ok(())
        })?,
    )?;
    let headsup = stage.headsup.clone();
    msg.set(
        "clear_cards",
        lua.create_function(move |_, ()| {
            headsup.borrow_mut().clear_cards();
            Ok(())
        })?,
    )?;
    let headsup = stage.headsup.clone();
    msg.set(
        "set_card_position",
        lua.create_function(move |_, (index, x, y): (usize, f32, f32)| {
            headsup.borrow_mut().set_card_position(index, x, y);
            Ok(())
        })?,
    )?;
    let headsup = stage.headsup.clone();
    msg.set(
        "set_card_centered",
        lua.create_function(move |_, (index, x, y): (usize, bool, bool)| {
            headsup.borrow_mut().set_card_centered(index, x, y);
            Ok(())
        })?,
    )?;

    let dialogue = stage.dialogue.clone();
    msg.set(
        "set_face",
        lua.create_function(move |_, (sheet, cell): (Option<usize>, Option<usize>)| {
            let face = match (sheet, cell) {
                (Some(sheet), Some(cell)) => Some((sheet, cell)),
                _ => None,
            };
            dialogue.borrow_mut().set_face(face);
            Ok(())
        })?,
    )?;
    let dialogue = stage.dialogue.clone();
    msg.set(
        "set_delay",
        lua.create_function(move |_, delay: Option<f32>| {
            dialogue.borrow_mut().set_delay(delay);
            Ok(())
        })?,
    )?;
    let dialogue = stage.dialogue.clone();
    msg.set(
        "top_box",
        lua.create_function(move |_, ()| {
            dialogue.borrow_mut().open_textbox_high();
            Ok(())
        })?,
    )?;
    let dialogue = stage.dialogue.clone();
    msg.set(
        "low_box",
        lua.create_function(move |_, ()| {
            dialogue.borrow_mut().open_textbox_low();
            Ok(())
        })?,
    )?;
    let dialogue = stage.dialogue.clone();
    msg.set(
        "say",
        lua.create_function(move |_, words: String| {
            dialogue.borrow_mut().write_textbox(&words);
            Ok(())
        })?,
    )?;
    let dialogue = stage.dialogue.clone();
    msg.set(
        "clear",
        lua.create_function(move |_, ()| {
            dialogue.borrow_mut().clear_textbox();
            Ok(())
        })?,
    )?;
    let dialogue = stage.dialogue.clone();
    msg.set(
        "close",
        lua.create_function(move |_, ()| {
            dialogue.borrow_mut().close_textbox();
            Ok(())
        })?,
    )?;
    let dialogue = stage.dialogue.clone();
    msg.set(
        "ask",
        lua.create_function(move |_, question: Vec<String>| {
            dialogue.borrow_mut().ask_question(question);
            Ok(())
        })?,
    )?;
    let dialogue = stage.dialogue.clone();
    msg.set(
        "get_answer",
        lua.create_function(move |_, ()| Ok(dialogue.borrow().get_answer()))?,
    )?;

    lua.globals().set("msg", msg)
}

fn register_audio(lua: &Lua, stage: &Stage) -> mlua::Result<()> {
    let aud = lua.create_table()?;

    let audio = stage.audio.clone();
    aud.set(
        "play",
        lua.create_function(move |_, (id, channel): (String, Option<usize>)| {
            audio.borrow_mut().play(&id, channel);
            Ok(())
        })?,
    )?;
    let audio = stage.audio.clone();
    aud.set(
        "pause",
        lua.create_function(move |_, channel: usize| {
            audio.borrow_mut().pause(channel);
            Ok(())
        })?,
    )?;
    let audio = stage.audio.clone();
    aud.set(
        "resume",
        lua.create_function(move |_, channel: usize| {
            audio.borrow_mut().resume(channel);
            Ok(())
        })?,
    )?;
    let audio = stage.audio.clone();
    aud.set(
        "set_volume",
        lua.create_function(move |_, volume: f32| {
            audio.borrow_mut().set_volume(volume);
            Ok(())
        })?,
    )?;
    let audio = stage.audio.clone();
    aud.set(
        "get_volume",
        lua.create_function(move |_, ()| Ok(audio.borrow().get_volume()))?,
    )?;
    lua.globals().set("aud", aud)?;

    let mus = lua.create_table()?;
    let music = stage.music.clone();
    mus.set(
        "load",
        lua.create_function(
            move |_, (tune, _start, _fade): (String, Option<f32>, Option<f32>)| {
                Ok(music.borrow_mut().load(&tune))
            },
        )?,
    )?;
    let music = stage.music.clone();
    mus.set(
        "exit",
        lua.create_function(move |_, ()| {
            music.borrow_mut().clear();
            Ok(())
        })?,
    )?;
    let music = stage.music.clone();
    mus.set(
        "play",
        lua.create_function(move |_, (start, fade): (Option<f32>, Option<f32>)| {
            music
                .borrow_mut()
                .play(start.unwrap_or(0.0), fade.unwrap_or(0.0));
            Ok(())
        })?,
    )?;
    let music = stage.music.clone();
    mus.set(
        "pause",
        lua.create_function(move |_, ()| {
            music.borrow_mut().pause();
            Ok(())
        })?,
    )?;
    let music = stage.music.clone();
    mus.set(
        "fade",
        lua.create_function(move |_, seconds: f32| {
            music.borrow_mut().fade_out(seconds);
            Ok(())
        })?,
    )?;
    let music = stage.music.clone();
    mus.set(
        "redo",
        lua.create_function(move |_, seconds: f32| {
            music.borrow_mut().resume(seconds);
            Ok(())
        })?,
    )?;
    let music = stage.music.clone();
    mus.set(
        "loop",
        lua.create_function(move |_, state: bool| {
            music.borrow_mut().set_looping(state);
            Ok(())
        })?,
    )?;
    let music = stage.music.clone();
    mus.set(
        "playing",
        lua.create_function(move |_, ()| Ok(music.borrow().running()))?,
    )?;
    let music = stage.music.clone();
    mus.set(
        "set_volume",
        lua.create_function(move |_, volume: f32| {
            music.borrow_mut().set_volume(volume);
            Ok(())
        })?,
    )?;
    let music = stage.music.clone();
    mus.set(
        "get_volume",
        lua.create_function(move |_, ()| Ok(music.borrow().get_volume()))?,
    )?;
    lua.globals().set("mus", mus)
}

fn register_scene(
    lua: &Lua,
    resources: &ResourceContext,
    stage: &Stage,
    hooks: &ScriptHooks,
) -> mlua::Result<()> {
    let ctx = lua.create_table()?;

    let scene = stage.scene.clone();
    let res = resources.clone();
    ctx.set(
        "spawn",
        lua.create_function(move |_, (name, x, y, id): (String, f32, f32, i32)| {
            Ok(scene.borrow_mut().spawn(&res, &name, x, y, id))
        })?,
    )?;
    let scene = stage.scene.clone();
    let res = resources.clone();
    ctx.set(
        "smoke",
        lua.create_function(move |_, (x, y, count): (f32, f32, usize)| {
            scene.borrow_mut().smoke(&res, x, y, count);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    let res = resources.clone();
    ctx.set(
        "shrapnel",
        lua.create_function(move |_, (x, y, count): (f32, f32, usize)| {
            scene.borrow_mut().shrapnel(&res, x, y, count);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    let res = resources.clone();
    ctx.set(
        "kill",
        lua.create_function(move |_, id: i32| {
            scene.borrow_mut().kill(&res, id);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    ctx.set(
        "destroy",
        lua.create_function(move |_, id: i32| {
            scene.borrow_mut().destroy(id);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    ctx.set(
        "move",
        lua.create_function(move |_, (id, velocity_x, velocity_y): (i32, f32, f32)| {
            scene.borrow_mut().bump(id, velocity_x, velocity_y);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    ctx.set(
        "animate",
        lua.create_function(move |_, (id, state, variation): (i32, usize, usize)| {
            scene.borrow_mut().animate(id, state, variation);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    ctx.set(
        "set_state",
        lua.create_function(move |_, (id, state): (i32, usize)| {
            scene.borrow_mut().set_state(id, state);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    ctx.set(
        "set_flag",
        lua.create_function(move |_, (id, flag, value): (i32, u32, bool)| {
            scene.borrow_mut().set_mask(id, flag, value);
            Ok(())
        })?,
    )?;

    // Trigger handlers live in the event table keyed by the actor id;
    // boss-fight handlers under the negated id.
    let events = hooks.events.clone();
    ctx.set(
        "set_event",
        lua.create_function(move |_, (id, event): (i32, Function)| {
            if id != 0 {
                events.borrow_mut().insert(id, event);
            }
            Ok(())
        })?,
    )?;
    let events = hooks.events.clone();
    ctx.set(
        "set_fight",
        lua.create_function(move |_, (id, event): (i32, Function)| {
            if id != 0 {
                events.borrow_mut().insert(-id, event);
            }
            Ok(())
        })?,
    )?;

    let scene = stage.scene.clone();
    ctx.set(
        "still",
        lua.create_function(move |_, id: i32| Ok(scene.borrow().still(id)))?,
    )?;

    lua.globals().set("ctx", ctx)
}

fn register_hero(lua: &Lua, stage: &Stage) -> mlua::Result<()> {
    let hero = lua.create_table()?;

    let scene = stage.scene.clone();
    hero.set(
        "visible",
        lua.create_function(move |_, state: bool| {
            scene.borrow_mut().hero.set_visible(state);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    hero.set(
        "animate",
        lua.create_function(move |_, (state, direction): (usize, usize)| {
            scene.borrow_mut().hero.animate(state, direction);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    hero.set(
        "teleport",
        lua.create_function(move |_, (x, y): (f32, f32)| {
            scene.borrow_mut().hero.teleport(x, y);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    hero.set(
        "life_up",
        lua.create_function(move |_, amount: i32| {
            scene.borrow_mut().hero.life_up(amount);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    hero.set(
        "life_boost",
        lua.create_function(move |_, amount: i32| {
            scene.borrow_mut().hero.life_boost(amount);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    hero.set(
        "mut_power",
        lua.create_function(move |_, amount: i32| {
            scene.borrow_mut().hero.mut_power(amount);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    hero.set(
        "equip",
        lua.create_function(move |_, (flag, value): (u32, bool)| {
            scene.borrow_mut().hero.set_equip(flag, value);
            Ok(())
        })?,
    )?;
    let scene = stage.scene.clone();
    hero.set(
        "bump",
        lua.create_function(move |_, direction: usize| {
            scene.borrow_mut().hero.bump(direction);
            Ok(())
        })?,
    )?;

    lua.globals().set("hero", hero)
}

fn register_camera(lua: &Lua, stage: &Stage) -> mlua::Result<()> {
    let cam = lua.create_table()?;

    let camera = stage.camera.clone();
    cam.set(
        "quake",
        lua.create_function(move |_, (factor, seconds): (f32, Option<f64>)| {
            match seconds {
                Some(seconds) => camera.borrow_mut().quake_timed(factor, seconds),
                None => camera.borrow_mut().quake(factor),
            }
            Ok(())
        })?,
    )?;
    let camera = stage.camera.clone();
    cam.set(
        "follow",
        lua.create_function(move |_, identity: i32| {
            camera.borrow_mut().follow(identity);
            Ok(())
        })?,
    )?;

    lua.globals().set("cam", cam)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{ExecState, Receiver};
    use std::io::Write;

    fn setup(boot: &str) -> (tempfile::TempDir, ResourceContext, Stage, Receiver) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("init")).unwrap();
        let mut file = std::fs::File::create(dir.path().join("init/boot.lua")).unwrap();
        write!(file, "{boot}").unwrap();
        let ctx = ResourceContext::mount(dir.path()).unwrap();
        let stage = Stage::new(&ctx);
        let mut receiver = Receiver::new();
        assert!(receiver.init(&ctx, &stage));
        (dir, ctx, stage, receiver)
    }

    fn run_to_idle(receiver: &mut Receiver, stage: &Stage) {
        receiver.run_function(stage);
        for _ in 0..64 {
            if receiver.state() == ExecState::Idle {
                return;
            }
            receiver.handle(stage);
        }
        panic!("script did not finish");
    }

    #[test]
    fn test_kernel_surface_round_trips() {
        let boot = r#"
function main()
    sys.set_flag(4, true)
    sys.add_item(2, 3, 9)
    sys.set_item_ptr_index(1)
    sys.set_file_index(2)
    sys.lock()
end
"#;
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        run_to_idle(&mut receiver, &stage);
        let kernel = stage.kernel.borrow();
        assert!(kernel.get_flag(4));
        assert_eq!(kernel.get_item_count(2), 3);
        assert_eq!(kernel.get_item_ptr_index(), Some(1));
        assert_eq!(kernel.get_file_index(), 2);
        // lock() ran, but completion closed dependencies and unlocked.
        assert!(!kernel.locked());
    }

    #[test]
    fn test_field_transfer_with_event_handle() {
        let boot = r#"
function greet()
end
function main()
    sys.set_field("shrine", 7, greet)
end
"#;
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        run_to_idle(&mut receiver, &stage);
        let mut kernel = stage.kernel.borrow_mut();
        assert!(kernel.transfer_pending());
        let transfer = kernel.take_transfer().unwrap();
        assert_eq!(transfer.field, "shrine");
        assert_eq!(transfer.id, 7);
        assert!(transfer.event.is_some());
    }

    #[test]
    fn test_dialogue_and_headsup_surface() {
        let boot = r#"
function main()
    msg.fade_out()
    msg.push_card("Chapter One", 0)
    msg.set_card_position(0, 12.0, 24.0)
    msg.top_box()
    msg.say("hello")
end
"#;
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        receiver.run_function(&stage);
        // The fade starts moving only after the first slice runs.
        receiver.handle(&stage);
        assert!(stage.headsup.borrow().is_fade_moving());
        assert_eq!(stage.headsup.borrow().cards().len(), 1);
        // Settle the fade so the script can finish.
        stage.headsup.borrow_mut().update(10.0);
        while receiver.state() != ExecState::Idle {
            receiver.handle(&stage);
        }
        // close_dependencies shut the box on completion.
        assert!(!stage.dialogue.borrow().open());
    }

    #[test]
    fn test_scene_surface() {
        let boot = r#"
function poke()
end
function main()
    ctx.spawn("crate", 32.0, 48.0, 11)
    ctx.move(11, 5.0, 0.0)
    ctx.set_flag(11, 2, true)
    ctx.set_event(11, poke)
    ctx.set_fight(11, poke)
    hero.teleport(100.0, 50.0)
    hero.life_boost(2)
    cam.quake(2.0, 0.5)
    cam.follow(11)
end
"#;
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        run_to_idle(&mut receiver, &stage);
        let scene = stage.scene.borrow();
        assert!(scene.actor_position(11).is_some());
        assert!(!scene.still(11));
        assert!(scene.get_mask(11, 2));
        assert_eq!(scene.hero.position(), macroquad::prelude::Vec2::new(100.0, 50.0));
        assert_eq!(scene.hero.barrier(), (5, 5));
        drop(scene);
        assert!(receiver.has_event(11));
        assert!(receiver.has_event(-11));
        assert!(stage.camera.borrow().quaking());
    }

    #[test]
    fn test_rand_and_locale() {
        let boot = r#"
function main()
    roll = sys.get_rand(1, 6)
    coin = sys.get_rand(0.0, 1.0)
    line = sys.locale("Greeting", 0)
    lines = sys.locale_size("Greeting")
end
"#;
        let (dir, ctx, stage, mut receiver) = setup(boot);
        std::fs::create_dir_all(dir.path().join("text")).unwrap();
        std::fs::write(
            dir.path().join("text/english.ron"),
            "{ \"Greeting\": [\"Hi\"] }",
        )
        .unwrap();
        assert!(ctx.try_language("english"));
        run_to_idle(&mut receiver, &stage);
        let probe = |key: &str| -> Option<mlua::Value> {
            let bank = receiver_modules(&receiver);
            bank.and_then(|env| env.get::<mlua::Value>(key).ok())
        };
        match probe("roll") {
            Some(mlua::Value::Integer(roll)) => assert!((1..=6).contains(&roll)),
            other => panic!("integer rand came back as {other:?}"),
        }
        match probe("coin") {
            Some(mlua::Value::Number(coin)) => assert!((0.0..1.0).contains(&coin)),
            other => panic!("float rand came back as {other:?}"),
        }
        assert!(matches!(probe("line"), Some(mlua::Value::String(s)) if s.to_string_lossy() == "Hi"));
        assert!(matches!(probe("lines"), Some(mlua::Value::Integer(1))));
    }

    fn receiver_modules(receiver: &Receiver) -> Option<mlua::Table> {
        receiver.boot_env()
    }
}
