#![cfg_attr(not(test), no_std)]

// Network interface layer for moteOS
// PCI discovery, the e1000 driver, the interface registry and ARP resolution

#[macro_use]
extern crate alloc;

pub mod arp;
pub mod config;
pub mod drivers;
pub mod error;
pub mod hal;
pub mod pci;
pub mod registry;
pub mod wire;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use arp::{build_request, resolve_into, validate_reply, ArpEngine, ReplyExpectation};
pub use config::{ArpConfig, E1000Config, NetConfig};
pub use drivers::interrupts::{dispatch_irq, irq_router, IrqRouter};
pub use drivers::{FrameSink, NetworkDriver, NicStatsSnapshot};
pub use error::NetError;
pub use hal::{AddressSpace, DmaPage, InterruptController, PageAllocator, Platform, Scheduler, WaitKey};
pub use pci::{enumerate, AttachContext, ConfigSpace, EnumerationReport, DEFAULT_DRIVERS};
#[cfg(target_arch = "x86_64")]
pub use pci::PortConfigSpace;
pub use registry::{nic_registry, InterfaceName, NicCapability, NicRegistry};
pub use wire::{MacAddress, MacText};
