// Boot information passed from bootloader to kernel

use crate::memory::MemoryMap;

/// Boot information passed to kernel_main
///
/// This structure contains all information needed by the kernel to initialize
/// and run the operating system.
#[repr(C)]
#[derive(Debug)]
pub struct BootInfo {
    /// Memory map from bootloader
    pub memory_map: MemoryMap,
    /// ACPI RSDP address (for power management)
    pub rsdp_addr: Option<usize>,
    /// Heap start address (virtual)
    pub heap_start: usize,
    /// Heap size in bytes
    pub heap_size: usize,
    /// Virtual address where physical memory is mapped (0 for identity)
    pub phys_offset: u64,
    /// Kernel command line, `key=value` pairs separated by whitespace
    pub cmdline: &'static str,
}

impl BootInfo {
    /// Create a new BootInfo structure
    pub fn new(
        memory_map: MemoryMap,
        rsdp_addr: Option<usize>,
        heap_start: usize,
        heap_size: usize,
        phys_offset: u64,
        cmdline: &'static str,
    ) -> Self {
        Self {
            memory_map,
            rsdp_addr,
            heap_start,
            heap_size,
            phys_offset,
            cmdline,
        }
    }
}
