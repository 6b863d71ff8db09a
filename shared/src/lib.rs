#![cfg_attr(not(test), no_std)]

// Shared crate for moteOS
// Boot handoff, memory map and timekeeping shared across crates

pub mod boot_info;
pub mod memory;
pub mod timer;

// Re-export shared boot types
pub use boot_info::BootInfo;
pub use memory::{MemoryKind, MemoryMap, MemoryRegion, PAGE_SIZE};
