//! Script receiver
//!
//! Owns the VM and the single execution coroutine, drives the
//! run/wait/stall state machine once per frame, loads and links script
//! modules, and keeps the event table of ref-counted function handles
//! used for indirect dispatch from data-driven triggers.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use mlua::{Function, HookTriggers, Lua, Table, Thread, ThreadStatus, VmState};

use crate::assets::ResourceContext;
use crate::input::Button;
use crate::stage::Stage;

use super::api;

/// Interpreted-statement budget before a script is forced to yield
pub const MAX_CALLS: u32 = 128;

const BOOT_MODULE: &str = "boot";
const ENTRY_DECL: &str = "main";
const DEATH_DECL: &str = "death";
const INVEN_DECL: &str = "inventory";

/// Module loading modes: `Global` is the privileged boot load, `Normal`
/// marks the module "current", `Import` must not change "current".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loading {
    Global,
    Normal,
    Import,
}

/// Observable execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Idle,
    Running,
    Waiting,
    Stalled,
}

/// What a suspension native asked for before yielding
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) enum PendingYield {
    #[default]
    None,
    Suspend,
    Stall,
    Wait(f32),
}

#[derive(Default)]
struct Bits {
    running: bool,
    waiting: bool,
    stalled: bool,
}

/// Named module environments in load order; index 0 is always boot
#[derive(Default)]
pub(crate) struct ModuleBank {
    pub(crate) modules: Vec<(String, Table)>,
    pub(crate) imports: HashMap<String, HashSet<String>>,
    pub(crate) loading: Vec<String>,
    pub(crate) current: Option<String>,
}

impl ModuleBank {
    pub(crate) fn get(&self, name: &str) -> Option<Table> {
        self.modules
            .iter()
            .find(|(module, _)| module == name)
            .map(|(_, env)| env.clone())
    }

    fn boot(&self) -> Option<Table> {
        self.modules.first().map(|(_, env)| env.clone())
    }
}

/// Shared handles the registered native functions close over
pub(crate) struct ScriptHooks {
    pub(crate) pending: Rc<RefCell<PendingYield>>,
    pub(crate) events: Rc<RefCell<HashMap<i32, Function>>>,
    pub(crate) modules: Rc<RefCell<ModuleBank>>,
}

/// Fetch-or-create a module environment and compile its source into it.
/// Import bindings are resolved recursively through the `import` native,
/// which lands back here with `Loading::Import`.
pub(crate) fn load_module(
    lua: &Lua,
    resources: &ResourceContext,
    modules: &Rc<RefCell<ModuleBank>>,
    name: &str,
    flags: Loading,
) -> bool {
    let existing = modules.borrow().get(name);
    let env = match existing {
        Some(env) => env,
        None => {
            let (env, meta) = match (lua.create_table(), lua.create_table()) {
                (Ok(env), Ok(meta)) => (env, meta),
                _ => {
                    println!("Couldn't allocate script module during loading process!");
                    return false;
                }
            };
            // Unqualified names fall through to the shared globals, where
            // the native surface lives.
            if meta.set("__index", lua.globals()).is_err() {
                println!("Couldn't allocate script module during loading process!");
                return false;
            }
            env.set_metatable(Some(meta));
            modules
                .borrow_mut()
                .modules
                .push((name.to_string(), env.clone()));
            env
        }
    };
    if modules.borrow().loading.iter().any(|loading| loading == name) {
        // Import cycle: hand back the partially built module, the same
        // tolerance Lua's own require has.
        return true;
    }
    let source = match resources.script_source(name, flags) {
        Ok(source) => source,
        Err(e) => {
            println!("Couldn't read script module \"{name}\": {e}");
            modules.borrow_mut().current = None;
            return false;
        }
    };
    modules.borrow_mut().loading.push(name.to_string());
    let result = lua
        .load(&source)
        .set_name(format!("@{name}"))
        .set_environment(env)
        .exec();
    modules.borrow_mut().loading.pop();
    match result {
        Ok(()) => {
            if flags == Loading::Normal {
                modules.borrow_mut().current = Some(name.to_string());
            }
            true
        }
        Err(e) => {
            println!("Building module \"{name}\" failed!\n{e}");
            modules.borrow_mut().current = None;
            false
        }
    }
}

pub struct Receiver {
    lua: Option<Lua>,
    exec: Option<Thread>,
    boot: Option<Function>,
    resources: Option<ResourceContext>,
    bits: Bits,
    timer: f32,
    start_args: Vec<i64>,
    armed: Rc<Cell<bool>>,
    pending: Rc<RefCell<PendingYield>>,
    events: Rc<RefCell<HashMap<i32, Function>>>,
    modules: Rc<RefCell<ModuleBank>>,
}

impl Receiver {
    pub fn new() -> Self {
        Self {
            lua: None,
            exec: None,
            boot: None,
            resources: None,
            bits: Bits::default(),
            timer: 0.0,
            start_args: Vec::new(),
            armed: Rc::new(Cell::new(false)),
            pending: Rc::new(RefCell::new(PendingYield::None)),
            events: Rc::new(RefCell::new(HashMap::new())),
            modules: Rc::new(RefCell::new(ModuleBank::default())),
        }
    }

    /// Create the VM, register the native surface, install the call-budget
    /// hook, load the boot module, and resolve its entry function. Any
    /// failing step logs and aborts initialization.
    pub fn init(&mut self, resources: &ResourceContext, stage: &Stage) -> bool {
        if self.lua.is_some() {
            println!("Scripting engine already exists!");
            return false;
        }
        let lua = Lua::new();
        let hooks = ScriptHooks {
            pending: self.pending.clone(),
            events: self.events.clone(),
            modules: self.modules.clone(),
        };
        if let Err(e) = api::register(&lua, resources, stage, &hooks) {
            println!("Registering the native function surface failed!\n{e}");
            return false;
        }
        // The cooperative call budget: every MAX_CALLS interpreted
        // statements the running coroutine is forced to yield. The hook is
        // disarmed outside execution so module loads run uninterrupted.
        let armed = self.armed.clone();
        let _ = lua.set_hook(
            HookTriggers::new().every_nth_instruction(MAX_CALLS),
            move |_lua, _debug| {
                if armed.get() {
                    Ok(VmState::Yield)
                } else {
                    Ok(VmState::Continue)
                }
            },
        );
        if !load_module(&lua, resources, &self.modules, BOOT_MODULE, Loading::Global) {
            println!("Global module loading failed!");
            return false;
        }
        let boot = match self
            .modules
            .borrow()
            .boot()
            .and_then(|env| env.get::<Function>(ENTRY_DECL).ok())
        {
            Some(function) => function,
            None => {
                println!("Couldn't find entry function in boot module!");
                return false;
            }
        };
        let exec = match lua.create_thread(boot.clone()) {
            Ok(thread) => thread,
            Err(e) => {
                println!("Scripting state creation failed! {e}");
                return false;
            }
        };
        self.resources = Some(resources.clone());
        self.boot = Some(boot);
        self.exec = Some(exec);
        self.lua = Some(lua);
        println!("Receiver subsystem initialized.");
        true
    }

    pub fn state(&self) -> ExecState {
        if self.bits.stalled {
            ExecState::Stalled
        } else if self.bits.waiting {
            ExecState::Waiting
        } else if self.bits.running {
            ExecState::Running
        } else {
            ExecState::Idle
        }
    }

    pub fn running(&self) -> bool {
        self.bits.running
    }

    pub fn wait_timer(&self) -> f32 {
        self.timer
    }

    fn rearm(&mut self) {
        self.bits.running = true;
        self.bits.waiting = false;
        self.bits.stalled = false;
        self.timer = 0.0;
    }

    /// Hard abort: kill the in-flight coroutine, clear all state bits and
    /// the event table. Used on scene transitions, not a graceful stop.
    pub fn reset(&mut self) {
        if let (Some(lua), Some(boot)) = (&self.lua, &self.boot) {
            match lua.create_thread(boot.clone()) {
                Ok(thread) => self.exec = Some(thread),
                Err(e) => println!("Couldn't rebuild the script context! {e}"),
            }
        }
        self.bits = Bits::default();
        self.timer = 0.0;
        self.start_args.clear();
        *self.pending.borrow_mut() = PendingYield::None;
        self.discard_all_events();
    }

    /// Tick the wait timer; reaching zero rearms execution
    pub fn update(&mut self, delta: f64) {
        if self.bits.waiting {
            self.timer -= delta as f32;
            if self.timer <= 0.0 {
                self.rearm();
            }
        }
    }

    /// Per-frame driver. At most one coroutine resumption happens here,
    /// and only when no fade is moving and no question is open.
    pub fn handle(&mut self, stage: &Stage) {
        if !self.bits.running {
            return;
        }
        {
            let headsup = stage.headsup.borrow();
            let dialogue = stage.dialogue.borrow();
            if headsup.is_fade_moving() || dialogue.question() {
                return;
            }
            if self.bits.stalled {
                if !dialogue.writing() && stage.input.borrow().pressed(Button::Yes) {
                    self.rearm();
                }
                return;
            }
            if self.bits.waiting {
                return;
            }
        }
        self.resume(stage);
    }

    fn resume(&mut self, stage: &Stage) {
        let Some(exec) = self.exec.clone() else {
            return;
        };
        let args = std::mem::take(&mut self.start_args);
        *self.pending.borrow_mut() = PendingYield::None;
        self.armed.set(true);
        let result = match args.len() {
            0 => exec.resume::<mlua::MultiValue>(()),
            1 => exec.resume::<mlua::MultiValue>(args[0]),
            _ => exec.resume::<mlua::MultiValue>((args[0], args[1])),
        };
        self.armed.set(false);
        match result {
            Ok(_) => match exec.status() {
                ThreadStatus::Resumable => {
                    let pending = std::mem::take(&mut *self.pending.borrow_mut());
                    match pending {
                        PendingYield::Wait(seconds) => {
                            self.bits.waiting = true;
                            self.bits.stalled = false;
                            self.timer = seconds;
                        }
                        PendingYield::Stall => {
                            self.bits.stalled = true;
                            self.bits.waiting = false;
                            self.timer = 0.0;
                        }
                        // Budget exhaustion or an explicit suspend: stay
                        // Running and continue next frame.
                        PendingYield::Suspend | PendingYield::None => {
                            self.timer = 0.0;
                        }
                    }
                }
                _ => self.close_dependencies(stage),
            },
            Err(e) => {
                self.bits = Bits::default();
                self.timer = 0.0;
                println!("Running script threw an exception!\n{e}");
            }
        }
    }

    /// A script ran to completion: unlock input if no blocking widget
    /// remains, invalidate cached widget geometry, close the text box.
    fn close_dependencies(&mut self, stage: &Stage) {
        self.bits = Bits::default();
        self.timer = 0.0;
        {
            let menu = stage.menu.borrow();
            if menu.empty() && !menu.inventory_open() {
                stage.kernel.borrow_mut().unlock();
            }
            menu.invalidate();
        }
        stage.dialogue.borrow_mut().close_textbox();
    }

    /// Compile a module by name
    pub fn load(&mut self, name: &str, flags: Loading) -> bool {
        let Some(lua) = &self.lua else {
            println!("Scripting engine doesn't exist!\nCouldn't load module!");
            return false;
        };
        let Some(resources) = &self.resources else {
            println!("Scripting engine has no resource context!");
            return false;
        };
        load_module(lua, resources, &self.modules, name, flags)
    }

    fn execute_function(&mut self, function: Function, args: Vec<i64>) {
        let Some(exec) = &self.exec else {
            println!("Couldn't execute function!");
            return;
        };
        match exec.reset(function) {
            Ok(()) => {
                self.rearm();
                self.start_args = args;
            }
            Err(e) => println!("Couldn't execute function! {e}"),
        }
    }

    fn find_function(&self, module: &str, symbol: &str) -> Option<Function> {
        let bank = self.modules.borrow();
        if let Some(env) = bank.get(module) {
            if let Ok(function) = env.get::<Function>(symbol) {
                return Some(function);
            }
        }
        bank.boot().and_then(|env| env.get::<Function>(symbol).ok())
    }

    /// Resolve a well-known handler in the current module, falling back to
    /// the boot module
    fn find_declared(&self, symbol: &str) -> Option<Function> {
        let bank = self.modules.borrow();
        if let Some(current) = &bank.current {
            if let Some(env) = bank.get(current) {
                if let Ok(function) = env.get::<Function>(symbol) {
                    return Some(function);
                }
            }
        }
        bank.boot().and_then(|env| env.get::<Function>(symbol).ok())
    }

    /// Start the kernel-selected entry: the boot entry on a fresh boot, a
    /// buffered special event if one exists, else the current field's
    /// `main`. No-op while a script is in flight.
    pub fn run_function(&mut self, stage: &Stage) {
        if self.bits.running {
            return;
        }
        enum Entry {
            Boot,
            Special(Function),
            Field(String),
        }
        let entry = {
            let kernel = stage.kernel.borrow();
            if kernel.has_zero() {
                Entry::Boot
            } else if let Some(function) = kernel.get_function() {
                Entry::Special(function)
            } else {
                Entry::Field(kernel.get_field().to_string())
            }
        };
        match entry {
            Entry::Boot => {
                if let Some(boot) = self.boot.clone() {
                    self.execute_function(boot, Vec::new());
                }
            }
            Entry::Special(function) => self.execute_function(function, Vec::new()),
            Entry::Field(field) => {
                let function = {
                    let bank = self.modules.borrow();
                    bank.get(&field)
                        .and_then(|env| env.get::<Function>(ENTRY_DECL).ok())
                };
                match function {
                    Some(function) => self.execute_function(function, Vec::new()),
                    None => println!("Couldn't find entry function for field \"{field}\"!"),
                }
            }
        }
    }

    /// Fire a registered event id; unregistered ids (and id 0) are no-ops
    pub fn run_event(&mut self, id: i32) {
        if self.bits.running || id == 0 {
            return;
        }
        let function = self.events.borrow().get(&id).cloned();
        if let Some(function) = function {
            self.execute_function(function, Vec::new());
        }
    }

    /// Start the inventory handler resolved by its well-known name
    pub fn run_inventory(&mut self, kind: i64, cursor: i64) {
        if self.bits.running {
            return;
        }
        match self.find_declared(INVEN_DECL) {
            Some(function) => self.execute_function(function, vec![kind, cursor]),
            None => println!("Couldn't find the inventory handler!"),
        }
    }

    /// Start the death handler resolved by its well-known name
    pub fn run_death(&mut self, kind: i64) {
        if self.bits.running {
            return;
        }
        match self.find_declared(DEATH_DECL) {
            Some(function) => self.execute_function(function, vec![kind]),
            None => println!("Couldn't find the death handler!"),
        }
    }

    /// Upsert an event handle from a named symbol, releasing any prior
    /// occupant. The symbol resolves against the given module first, then
    /// the boot module.
    pub fn push_from_symbol(&mut self, id: i32, module: &str, symbol: &str) {
        self.events.borrow_mut().remove(&id);
        if let Some(function) = self.find_function(module, symbol) {
            self.events.borrow_mut().insert(id, function);
        }
    }

    /// Upsert an event handle from a live function value
    pub fn push_from_function(&mut self, id: i32, function: Function) {
        self.events.borrow_mut().insert(id, function);
    }

    pub fn has_event(&self, id: i32) -> bool {
        self.events.borrow().contains_key(&id)
    }

    pub fn event_count(&self) -> usize {
        self.events.borrow().len()
    }

    /// Release every event handle. When the current module imports
    /// nothing, also unload every non-boot module: the import edge is the
    /// retention signal, so a self-contained field can be swapped out
    /// wholesale at a transition boundary.
    pub fn discard_all_events(&mut self) {
        {
            let mut bank = self.modules.borrow_mut();
            let unload = match &bank.current {
                Some(current) => bank
                    .imports
                    .get(current)
                    .map_or(true, |imports| imports.is_empty()),
                None => false,
            };
            if unload {
                bank.modules.truncate(1);
                bank.imports.retain(|name, _| name == BOOT_MODULE);
            }
            bank.current = None;
        }
        self.events.borrow_mut().clear();
    }

    pub fn module_count(&self) -> usize {
        self.modules.borrow().modules.len()
    }

    pub fn has_module(&self, name: &str) -> bool {
        self.modules.borrow().get(name).is_some()
    }

    #[cfg(test)]
    pub(crate) fn boot_env(&self) -> Option<Table> {
        self.modules.borrow().boot()
    }

    #[cfg(test)]
    fn probe_flag(&self, module: &str, key: &str) -> bool {
        self.modules
            .borrow()
            .get(module)
            .and_then(|env| env.get::<bool>(key).ok())
            .unwrap_or(false)
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;

    fn write_script(root: &Path, directory: &str, name: &str, source: &str) {
        let dir = root.join(directory);
        if !dir.is_dir() {
            std::fs::create_dir_all(&dir).unwrap();
        }
        let mut file = std::fs::File::create(dir.join(format!("{name}.lua"))).unwrap();
        write!(file, "{source}").unwrap();
    }

    fn setup(boot: &str) -> (tempfile::TempDir, ResourceContext, Stage, Receiver) {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "init", "boot", boot);
        let ctx = ResourceContext::mount(dir.path()).unwrap();
        let stage = Stage::new(&ctx);
        let mut receiver = Receiver::new();
        assert!(receiver.init(&ctx, &stage));
        (dir, ctx, stage, receiver)
    }

    const EMPTY_BOOT: &str = "function main()\nend\n";

    #[test]
    fn test_init_is_once_only() {
        let (_dir, ctx, stage, mut receiver) = setup(EMPTY_BOOT);
        assert!(!receiver.init(&ctx, &stage));
    }

    #[test]
    fn test_init_fails_without_boot_module() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ResourceContext::mount(dir.path()).unwrap();
        let stage = Stage::new(&ctx);
        let mut receiver = Receiver::new();
        assert!(!receiver.init(&ctx, &stage));
        assert_eq!(receiver.state(), ExecState::Idle);
    }

    #[test]
    fn test_unregistered_event_is_a_noop() {
        let (_dir, _ctx, _stage, mut receiver) = setup(EMPTY_BOOT);
        receiver.run_event(5);
        assert_eq!(receiver.state(), ExecState::Idle);
    }

    #[test]
    fn test_boot_entry_runs_to_completion() {
        let boot = "function main()\n  booted = true\nend\n";
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        receiver.run_function(&stage);
        assert_eq!(receiver.state(), ExecState::Running);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Idle);
        assert!(receiver.probe_flag("boot", "booted"));
    }

    #[test]
    fn test_wait_counts_down_to_running() {
        let boot = "function main()\n  sys.wait(2.0)\n  waited = true\nend\n";
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        receiver.run_function(&stage);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Waiting);
        receiver.update(1.0);
        assert_eq!(receiver.state(), ExecState::Waiting);
        assert!(!receiver.probe_flag("boot", "waited"));
        receiver.update(1.5);
        assert_eq!(receiver.state(), ExecState::Running);
        assert_eq!(receiver.wait_timer(), 0.0);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Idle);
        assert!(receiver.probe_flag("boot", "waited"));
    }

    #[test]
    fn test_stall_waits_for_confirm_edge() {
        let boot = "function main()\n  sys.wait()\n  confirmed = true\nend\n";
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        receiver.run_function(&stage);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Stalled);
        // No confirm press: stays stalled.
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Stalled);
        stage.input.borrow_mut().inject(Button::Yes);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Running);
        stage.input.borrow_mut().settle();
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Idle);
        assert!(receiver.probe_flag("boot", "confirmed"));
    }

    #[test]
    fn test_call_budget_suspends_long_scripts() {
        let boot = "function main()\n  local x = 0\n  for i = 1, 100000 do\n    x = x + 1\n  end\n  spun = true\nend\n";
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        receiver.run_function(&stage);
        receiver.handle(&stage);
        // The budget hook forced a yield mid-loop.
        assert_eq!(receiver.state(), ExecState::Running);
        assert!(!receiver.probe_flag("boot", "spun"));
        let mut frames = 1;
        while receiver.state() == ExecState::Running && frames < 100_000 {
            receiver.handle(&stage);
            frames += 1;
        }
        assert_eq!(receiver.state(), ExecState::Idle);
        assert!(receiver.probe_flag("boot", "spun"));
        assert!(frames > 1, "a 100k-statement loop must not finish in one slice");
    }

    #[test]
    fn test_suspend_yields_exactly_one_frame() {
        let boot = "function main()\n  sys.suspend()\n  resumed = true\nend\n";
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        receiver.run_function(&stage);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Running);
        assert!(!receiver.probe_flag("boot", "resumed"));
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Idle);
        assert!(receiver.probe_flag("boot", "resumed"));
    }

    #[test]
    fn test_runtime_error_forces_idle() {
        let boot = "function main()\n  error(\"boom\")\nend\n";
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        receiver.run_function(&stage);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Idle);
        // The receiver stays usable after an exception.
        receiver.run_function(&stage);
        assert_eq!(receiver.state(), ExecState::Running);
    }

    #[test]
    fn test_completion_closes_dependencies() {
        let boot = "function main()\n  sys.lock()\n  msg.low_box()\n  msg.say(\"hi\")\nend\n";
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        receiver.run_function(&stage);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Idle);
        assert!(!stage.kernel.borrow().locked());
        assert!(!stage.dialogue.borrow().open());
    }

    #[test]
    fn test_at_most_one_script_in_flight() {
        let boot = "function main()\n  sys.wait(60.0)\nend\n";
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        receiver.run_function(&stage);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Waiting);
        // Entry points are no-ops while a script is mid-flight.
        receiver.run_function(&stage);
        receiver.run_event(5);
        receiver.run_death(1);
        assert_eq!(receiver.state(), ExecState::Waiting);
    }

    #[test]
    fn test_module_loading_and_import_linking() {
        let (dir, _ctx, stage, mut receiver) = setup(EMPTY_BOOT);
        write_script(
            dir.path(),
            "events",
            "common",
            "function helper()\n  helped = true\nend\n",
        );
        write_script(
            dir.path(),
            "events",
            "field0",
            "local common = import(\"common\")\nfunction main()\n  common.helper()\nend\n",
        );
        assert!(receiver.load("field0", Loading::Normal));
        assert!(receiver.has_module("common"));
        assert_eq!(receiver.module_count(), 3);
        stage.kernel.borrow_mut().buffer_field("field0", 0, None);
        stage.kernel.borrow_mut().take_transfer();
        receiver.run_function(&stage);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Idle);
        assert!(receiver.probe_flag("common", "helped"));
    }

    #[test]
    fn test_compile_failure_clears_current() {
        let (dir, _ctx, _stage, mut receiver) = setup(EMPTY_BOOT);
        write_script(dir.path(), "events", "good", EMPTY_BOOT);
        write_script(dir.path(), "events", "broken", "function main(\n");
        assert!(receiver.load("good", Loading::Normal));
        assert!(!receiver.load("broken", Loading::Normal));
        // With no trustworthy current module the discard pass must not
        // unload anything.
        let modules = receiver.module_count();
        receiver.discard_all_events();
        assert_eq!(receiver.module_count(), modules);
    }

    #[test]
    fn test_missing_module_source_fails() {
        let (_dir, _ctx, _stage, mut receiver) = setup(EMPTY_BOOT);
        assert!(!receiver.load("ghost", Loading::Normal));
    }

    #[test]
    fn test_event_upsert_releases_prior_handle() {
        let (dir, _ctx, _stage, mut receiver) = setup(EMPTY_BOOT);
        write_script(
            dir.path(),
            "events",
            "field0",
            "function first()\n  which = 1\nend\nfunction second()\n  which = 2\nend\n",
        );
        assert!(receiver.load("field0", Loading::Normal));
        receiver.push_from_symbol(7, "field0", "first");
        assert!(receiver.has_event(7));
        receiver.push_from_symbol(7, "field0", "second");
        assert_eq!(receiver.event_count(), 1);
        // A symbol that resolves nowhere releases without replacing.
        receiver.push_from_symbol(7, "field0", "missing");
        assert!(!receiver.has_event(7));
        assert_eq!(receiver.event_count(), 0);
    }

    #[test]
    fn test_registered_event_dispatch() {
        let (dir, _ctx, stage, mut receiver) = setup(EMPTY_BOOT);
        write_script(
            dir.path(),
            "events",
            "field0",
            "function on_switch()\n  flipped = true\nend\n",
        );
        assert!(receiver.load("field0", Loading::Normal));
        receiver.push_from_symbol(9, "field0", "on_switch");
        receiver.run_event(9);
        assert_eq!(receiver.state(), ExecState::Running);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Idle);
        assert!(receiver.probe_flag("field0", "flipped"));
    }

    #[test]
    fn test_death_handler_receives_argument() {
        let boot = "function main()\nend\nfunction death(kind)\n  death_kind = kind\nend\n";
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        receiver.run_death(3);
        assert_eq!(receiver.state(), ExecState::Running);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Idle);
        let kind = receiver
            .modules
            .borrow()
            .get("boot")
            .and_then(|env| env.get::<i64>("death_kind").ok());
        assert_eq!(kind, Some(3));
    }

    #[test]
    fn test_death_handler_prefers_current_module() {
        let boot = "function main()\nend\nfunction death(kind)\n  where = \"boot\"\nend\n";
        let (dir, _ctx, stage, mut receiver) = setup(boot);
        write_script(
            dir.path(),
            "events",
            "field0",
            "function death(kind)\n  where = \"field\"\nend\n",
        );
        assert!(receiver.load("field0", Loading::Normal));
        receiver.run_death(1);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Idle);
        assert!(!receiver.probe_flag("boot", "where"));
        let place = receiver
            .modules
            .borrow()
            .get("field0")
            .and_then(|env| env.get::<String>("where").ok());
        assert_eq!(place.as_deref(), Some("field"));
    }

    #[test]
    fn test_inventory_handler_receives_both_arguments() {
        let boot =
            "function main()\nend\nfunction inventory(kind, cursor)\n  seen = kind * 100 + cursor\nend\n";
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        receiver.run_inventory(4, 2);
        receiver.handle(&stage);
        let seen = receiver
            .modules
            .borrow()
            .get("boot")
            .and_then(|env| env.get::<i64>("seen").ok());
        assert_eq!(seen, Some(402));
    }

    #[test]
    fn test_discard_unloads_importless_current_module() {
        let (dir, _ctx, _stage, mut receiver) = setup(EMPTY_BOOT);
        write_script(dir.path(), "events", "lone", "function main()\nend\n");
        assert!(receiver.load("lone", Loading::Normal));
        assert_eq!(receiver.module_count(), 2);
        receiver.push_from_symbol(1, "lone", "main");
        receiver.discard_all_events();
        assert_eq!(receiver.event_count(), 0);
        assert_eq!(receiver.module_count(), 1);
        assert!(receiver.has_module("boot"));
    }

    #[test]
    fn test_discard_keeps_modules_behind_import_edges() {
        let (dir, _ctx, _stage, mut receiver) = setup(EMPTY_BOOT);
        write_script(dir.path(), "events", "common", "shared = true\n");
        write_script(
            dir.path(),
            "events",
            "field0",
            "import(\"common\")\nfunction main()\nend\n",
        );
        assert!(receiver.load("field0", Loading::Normal));
        assert_eq!(receiver.module_count(), 3);
        receiver.discard_all_events();
        // The current module held an import edge, so nothing unloads.
        assert_eq!(receiver.module_count(), 3);
    }

    #[test]
    fn test_reset_aborts_waiting_script() {
        let boot = "function main()\n  sys.wait(60.0)\nend\n";
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        receiver.run_function(&stage);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Waiting);
        receiver.push_from_symbol(1, "boot", "main");
        receiver.reset();
        assert_eq!(receiver.state(), ExecState::Idle);
        assert_eq!(receiver.wait_timer(), 0.0);
        assert_eq!(receiver.event_count(), 0);
        // The receiver accepts new work after the hard reset.
        receiver.run_function(&stage);
        assert_eq!(receiver.state(), ExecState::Running);
    }

    #[test]
    fn test_moving_fade_blocks_execution() {
        let boot = "function main()\n  finished = true\nend\n";
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        stage.headsup.borrow_mut().fade_out();
        receiver.run_function(&stage);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Running);
        assert!(!receiver.probe_flag("boot", "finished"));
        // Once the fade settles, execution proceeds.
        stage.headsup.borrow_mut().update(10.0);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Idle);
        assert!(receiver.probe_flag("boot", "finished"));
    }

    #[test]
    fn test_open_question_blocks_execution() {
        let boot = "function main()\n  finished = true\nend\n";
        let (_dir, _ctx, stage, mut receiver) = setup(boot);
        stage
            .dialogue
            .borrow_mut()
            .ask_question(vec!["yes".into(), "no".into()]);
        receiver.run_function(&stage);
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Running);
        stage.input.borrow_mut().inject(Button::Yes);
        stage.handle();
        receiver.handle(&stage);
        assert_eq!(receiver.state(), ExecState::Idle);
    }
}
