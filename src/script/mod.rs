//! Scripting bridge
//!
//! A Lua 5.4 VM hosts the game's event scripts as cooperative coroutines:
//! an instruction-count hook bounds how long a script can hog a frame, and
//! the wait/stall/suspend natives yield back to the host loop. The
//! receiver owns the VM, the module table, and the event dispatch map.

mod api;
mod receiver;

pub use receiver::{ExecState, Loading, Receiver, MAX_CALLS};
