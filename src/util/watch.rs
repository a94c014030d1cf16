//! Monotonic timestamps for capture tokens

use std::sync::atomic::{AtomicI64, Ordering};

static COUNTER: AtomicI64 = AtomicI64::new(1);

/// Return a process-unique, strictly increasing, nonzero timestamp.
///
/// Zero is reserved to mean "no timestamp" (a display list that is not
/// captured), so the counter starts at 1.
pub fn timestamp() -> i64 {
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
