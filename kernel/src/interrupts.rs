//! Hardware interrupt entry points
//!
//! The boot crate's IDT stubs call these with the legacy line number.

use crate::init;
use crate::pic::Pic;
use log::trace;
use spin::Once;

/// Line the PIT is wired to
pub const TIMER_LINE: u8 = 0;

static PIC: Once<Pic> = Once::new();

/// The system's interrupt controller pair
pub fn pic() -> &'static Pic {
    PIC.call_once(Pic::new)
}

/// Periodic timer tick.
#[cfg(target_arch = "x86_64")]
pub fn timer_interrupt() {
    shared::timer::increment_ticks();
    pic().end_of_interrupt(TIMER_LINE);
}

/// A network controller raised `line`.
///
/// Every driver sharing the line drains its receive ring into the ARP
/// engine before the line is acknowledged.
#[cfg(target_arch = "x86_64")]
pub fn nic_interrupt(line: u8) {
    let delivered = match init::arp_engine() {
        Some(engine) => netif::dispatch_irq(line, engine),
        None => 0,
    };
    trace!("irq {}: {} frames", line, delivered);
    pic().end_of_interrupt(line);
}
