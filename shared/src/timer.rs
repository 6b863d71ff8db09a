// Timer support for moteOS
// Tick counter driven by the periodic timer interrupt

use core::sync::atomic::{AtomicU64, Ordering};

/// Global tick counter
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Timer frequency in Hz
static TIMER_FREQUENCY: AtomicU64 = AtomicU64::new(100); // Default to 100Hz

/// Record the rate the periodic timer was programmed with.
///
/// Called once during boot, before interrupts are enabled.
pub fn set_frequency(frequency_hz: u64) {
    TIMER_FREQUENCY.store(frequency_hz.max(1), Ordering::Relaxed);
}

/// Get the timer frequency in Hz
pub fn get_frequency() -> u64 {
    TIMER_FREQUENCY.load(Ordering::Relaxed)
}

/// Get the current tick count
///
/// The tick count increments on each timer interrupt.
pub fn get_ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Increment the tick counter
///
/// This is called by the timer interrupt handler.
pub fn increment_ticks() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

/// Milliseconds since the timer started
pub fn now_ms() -> u64 {
    ticks_to_ms(get_ticks(), get_frequency())
}

/// Length of one tick in milliseconds, rounded up
pub fn tick_ms() -> u64 {
    1000u64.div_ceil(get_frequency())
}

pub const fn ticks_to_ms(ticks: u64, frequency_hz: u64) -> u64 {
    ticks.saturating_mul(1000) / frequency_hz
}
