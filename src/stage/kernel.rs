//! Kernel: progress state and field transfer
//!
//! Holds the save-relevant game state (flags, items, current field), the
//! input lock bits scripts toggle around cutscenes, and the buffered field
//! transfer that the shell services between frames. Save/checkpoint files
//! are RON snapshots under the mounted data directory.

use mlua::Function;
use serde::{Deserialize, Serialize};

use crate::assets::ResourceContext;

pub const MAX_ITEMS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSlot {
    pub kind: i32,
    pub count: i32,
    pub limit: i32,
    pub optor: i32,
}

/// A buffered request to enter another field
pub struct Transfer {
    pub field: String,
    pub id: i32,
    pub event: Option<Function>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    flags: Vec<bool>,
    items: Vec<ItemSlot>,
    field: String,
    field_id: i32,
}

pub struct Kernel {
    zero: bool,
    locked: bool,
    frozen: bool,
    quit: bool,
    reboot: bool,
    flags: Vec<bool>,
    items: Vec<ItemSlot>,
    item_ptr: Option<usize>,
    file_index: usize,
    field: String,
    field_id: i32,
    transfer: Option<Transfer>,
    function: Option<Function>,
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            zero: true,
            locked: false,
            frozen: false,
            quit: false,
            reboot: false,
            flags: Vec::new(),
            items: Vec::new(),
            item_ptr: None,
            file_index: 0,
            field: String::new(),
            field_id: 0,
            transfer: None,
            function: None,
        }
    }

    /// Fresh-boot state: nothing loaded yet, the boot entry runs next
    pub fn has_zero(&self) -> bool {
        self.zero
    }

    pub fn get_flag(&self, index: usize) -> bool {
        self.flags.get(index).copied().unwrap_or(false)
    }

    pub fn set_flag(&mut self, index: usize, value: bool) {
        if index >= self.flags.len() {
            self.flags.resize(index + 1, false);
        }
        self.flags[index] = value;
    }

    fn slot_mut(&mut self, kind: i32) -> Option<&mut ItemSlot> {
        self.items.iter_mut().find(|slot| slot.kind == kind)
    }

    pub fn set_item(&mut self, kind: i32, count: i32, limit: i32, optor: i32) {
        if let Some(slot) = self.slot_mut(kind) {
            slot.count = count;
            slot.limit = limit;
            slot.optor = optor;
        } else if self.items.len() < MAX_ITEMS {
            self.items.push(ItemSlot {
                kind,
                count,
                limit,
                optor,
            });
        } else {
            println!("Warning! Item table is full, dropped item {kind}!");
        }
    }

    pub fn set_item_limit(&mut self, kind: i32, limit: i32) {
        if let Some(slot) = self.slot_mut(kind) {
            slot.limit = limit;
        }
    }

    pub fn set_item_optor(&mut self, kind: i32, optor: i32) {
        if let Some(slot) = self.slot_mut(kind) {
            slot.optor = optor;
        }
    }

    pub fn add_item(&mut self, kind: i32, count: i32, limit: i32) {
        if let Some(slot) = self.slot_mut(kind) {
            slot.limit = limit;
            slot.count = (slot.count + count).min(limit);
        } else {
            self.set_item(kind, count.min(limit), limit, 0);
        }
    }

    pub fn sub_item(&mut self, kind: i32, count: i32) {
        if let Some(slot) = self.slot_mut(kind) {
            slot.count -= count;
            if slot.count <= 0 {
                self.rid_item(kind);
            }
        }
    }

    pub fn rid_item(&mut self, kind: i32) {
        self.items.retain(|slot| slot.kind != kind);
    }

    pub fn get_item_count(&self, kind: i32) -> i32 {
        self.items
            .iter()
            .find(|slot| slot.kind == kind)
            .map(|slot| slot.count)
            .unwrap_or(0)
    }

    pub fn set_item_ptr_index(&mut self, index: Option<usize>) {
        self.item_ptr = index;
    }

    pub fn get_item_ptr_index(&self) -> Option<usize> {
        self.item_ptr
    }

    pub fn get_max_items(&self) -> usize {
        MAX_ITEMS
    }

    /// Take input away from the player while a script runs
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Freeze gameplay as well as input
    pub fn freeze(&mut self) {
        self.locked = true;
        self.frozen = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
        self.frozen = false;
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn frozen(&self) -> bool {
        self.frozen
    }

    /// Restart from the boot module, dropping all progress
    pub fn boot(&mut self) {
        self.zero = true;
        self.reboot = true;
        self.flags.clear();
        self.items.clear();
        self.item_ptr = None;
        self.field.clear();
        self.field_id = 0;
        self.transfer = None;
        self.function = None;
    }

    pub fn quit(&mut self) {
        self.quit = true;
    }

    pub fn quitting(&self) -> bool {
        self.quit
    }

    pub fn take_reboot(&mut self) -> bool {
        std::mem::take(&mut self.reboot)
    }

    /// Buffer a field change; the shell services it between frames
    pub fn buffer_field(&mut self, field: &str, id: i32, event: Option<Function>) {
        self.transfer = Some(Transfer {
            field: field.to_string(),
            id,
            event,
        });
    }

    pub fn transfer_pending(&self) -> bool {
        self.transfer.is_some()
    }

    /// Consume the buffered transfer, committing it as the current field
    pub fn take_transfer(&mut self) -> Option<Transfer> {
        let transfer = self.transfer.take()?;
        self.zero = false;
        self.field = transfer.field.clone();
        self.field_id = transfer.id;
        self.function = transfer.event.clone();
        Some(transfer)
    }

    pub fn get_field(&self) -> &str {
        &self.field
    }

    pub fn get_field_id(&self) -> i32 {
        self.field_id
    }

    /// Special entry function buffered with the last transfer, if any
    pub fn get_function(&self) -> Option<Function> {
        self.function.clone()
    }

    pub fn set_file_index(&mut self, index: usize) {
        self.file_index = index;
    }

    pub fn get_file_index(&self) -> usize {
        self.file_index
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            flags: self.flags.clone(),
            items: self.items.clone(),
            field: self.field.clone(),
            field_id: self.field_id,
        }
    }

    fn apply(&mut self, snapshot: Snapshot) {
        self.flags = snapshot.flags;
        self.items = snapshot.items;
        // Re-enter the saved field through the normal transfer path.
        self.buffer_field(&snapshot.field.clone(), snapshot.field_id, None);
    }

    fn write_snapshot(&self, ctx: &ResourceContext, name: &str) {
        let path = ctx.save_path().join(name);
        match ron::to_string(&self.snapshot()) {
            Ok(serialized) => {
                if let Err(e) = std::fs::write(&path, serialized) {
                    println!("Couldn't write save file \"{}\": {e}", path.display());
                }
            }
            Err(e) => println!("Couldn't serialize save state: {e}"),
        }
    }

    fn read_snapshot(&mut self, ctx: &ResourceContext, name: &str) {
        let path = ctx.save_path().join(name);
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                println!("Couldn't read save file \"{}\": {e}", path.display());
                return;
            }
        };
        match ron::from_str::<Snapshot>(&source) {
            Ok(snapshot) => self.apply(snapshot),
            Err(e) => println!("Couldn't parse save file \"{}\": {e}", path.display()),
        }
    }

    pub fn save_progress(&self, ctx: &ResourceContext) {
        self.write_snapshot(ctx, &format!("file{}.ron", self.file_index));
    }

    pub fn load_progress(&mut self, ctx: &ResourceContext) {
        self.read_snapshot(ctx, &format!("file{}.ron", self.file_index));
    }

    pub fn save_checkpoint(&self, ctx: &ResourceContext) {
        self.write_snapshot(ctx, &format!("checkpoint{}.ron", self.file_index));
    }

    pub fn load_checkpoint(&mut self, ctx: &ResourceContext) {
        self.read_snapshot(ctx, &format!("checkpoint{}.ron", self.file_index));
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
