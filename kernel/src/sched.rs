//! Tick-driven block/wake for kernel contexts
//!
//! There is a single kernel context, so blocking means halting until the
//! next interrupt and letting the caller re-check its condition.

use alloc::collections::BTreeSet;
use netif::{Scheduler, WaitKey};
use spin::Mutex;

/// Keys woken since their sleeper last looked
pub struct WokenSet {
    keys: Mutex<BTreeSet<WaitKey>>,
}

impl WokenSet {
    pub const fn new() -> Self {
        Self {
            keys: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn insert(&self, key: WaitKey) {
        self.keys.lock().insert(key);
    }

    /// Consume a pending wake-up for `key`.
    pub fn take(&self, key: WaitKey) -> bool {
        self.keys.lock().remove(&key)
    }
}

impl Default for WokenSet {
    fn default() -> Self {
        Self::new()
    }
}

/// [`Scheduler`] over `shared::timer` ticks
pub struct TickScheduler {
    woken: WokenSet,
}

impl TickScheduler {
    pub const fn new() -> Self {
        Self { woken: WokenSet::new() }
    }
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_arch = "x86_64")]
impl Scheduler for TickScheduler {
    fn now_ms(&self) -> u64 {
        shared::timer::now_ms()
    }

    fn block(&self, key: WaitKey, deadline_ms: u64) {
        use x86_64::instructions::interrupts;

        // wake() runs in interrupt context, so the set is only touched with
        // interrupts off
        interrupts::disable();
        if self.woken.take(key) || shared::timer::now_ms() >= deadline_ms {
            interrupts::enable();
            return;
        }
        // Atomically re-enable and halt; the timer tick bounds the sleep
        interrupts::enable_and_hlt();
    }

    fn wake(&self, key: WaitKey) {
        x86_64::instructions::interrupts::without_interrupts(|| self.woken.insert(key));
    }
}
