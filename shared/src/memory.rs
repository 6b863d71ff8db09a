// Memory map types and the physical direct map shared across moteOS crates

use core::sync::atomic::{AtomicU64, Ordering};

/// Size of a physical frame
pub const PAGE_SIZE: usize = 4096;

/// Memory region kind
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryKind {
    /// Usable RAM
    Usable,
    /// Reserved (not usable)
    Reserved,
    /// ACPI reclaimable memory
    AcpiReclaimable,
    /// ACPI NVS (Non-Volatile Storage)
    AcpiNvs,
}

/// Memory region descriptor
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MemoryRegion {
    /// Physical start address
    pub start: usize,
    /// Length in bytes
    pub len: usize,
    /// Memory kind
    pub kind: MemoryKind,
}

impl MemoryRegion {
    pub const fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Memory map containing all memory regions
#[repr(C)]
#[derive(Debug)]
pub struct MemoryMap {
    /// Array of memory regions (stored in static memory after boot)
    pub regions: &'static [MemoryRegion],
}

impl MemoryMap {
    /// Create a new memory map
    pub fn new(regions: &'static [MemoryRegion]) -> Self {
        Self { regions }
    }

    pub fn usable(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter().filter(|r| r.kind == MemoryKind::Usable)
    }

    /// Find the largest usable memory region
    pub fn find_largest_usable(&self) -> Option<&MemoryRegion> {
        self.usable().max_by_key(|r| r.len)
    }

    /// Calculate total usable memory
    pub fn total_usable(&self) -> usize {
        self.usable().map(|r| r.len).sum()
    }
}

/// Virtual address at which all of physical memory is mapped
static PHYS_OFFSET: AtomicU64 = AtomicU64::new(0);

/// Record the direct-map offset handed over by the bootloader.
pub fn set_phys_offset(offset: u64) {
    PHYS_OFFSET.store(offset, Ordering::Relaxed);
}

pub fn phys_offset() -> u64 {
    PHYS_OFFSET.load(Ordering::Relaxed)
}

/// Translate a physical address into the direct map.
pub fn phys_to_virt(phys: u64) -> u64 {
    phys.wrapping_add(phys_offset())
}

/// Translate a direct-map address back to physical.
///
/// Returns `None` for addresses below the direct map.
pub fn virt_to_phys(virt: u64) -> Option<u64> {
    virt.checked_sub(phys_offset())
}
