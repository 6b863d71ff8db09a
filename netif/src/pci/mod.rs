// PCI (Peripheral Component Interconnect) device discovery and configuration

mod scan;

pub use scan::{
    dispatch, enable_device, enumerate, probe_resources, AttachContext, AttachFn, DriverEntry,
    EnumerationReport, DEFAULT_DRIVERS,
};

use core::fmt;

/// Configuration-space register offsets (type 0 header)
pub const REG_VENDOR_DEVICE: u8 = 0x00;
pub const REG_COMMAND_STATUS: u8 = 0x04;
pub const REG_CLASS: u8 = 0x08;
pub const REG_HEADER: u8 = 0x0C;
pub const REG_BAR0: u8 = 0x10;
pub const REG_INTERRUPT: u8 = 0x3C;

/// Command register bits
pub const COMMAND_IO_SPACE: u16 = 1 << 0;
pub const COMMAND_MEMORY_SPACE: u16 = 1 << 1;
pub const COMMAND_BUS_MASTER: u16 = 1 << 2;

/// Header-type bit 7 marks a multifunction device
pub const HEADER_MULTIFUNCTION: u8 = 0x80;

/// Vendor ID read back for an absent function
pub const VENDOR_NONE: u16 = 0xFFFF;

/// Base class for network controllers
pub const CLASS_NETWORK: u8 = 0x02;

/// Number of base address registers in a type 0 header
pub const BAR_COUNT: usize = 6;

/// Location of one function in configuration space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PciAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub const fn new(bus: u8, device: u8, function: u8) -> Self {
        Self { bus, device, function }
    }

    /// Value for the 0xCF8 address port selecting the dword at `offset`.
    pub const fn config_address(&self, offset: u8) -> u32 {
        (1u32 << 31)
            | ((self.bus as u32) << 16)
            | (((self.device & 0x1F) as u32) << 11)
            | (((self.function & 0x07) as u32) << 8)
            | (offset as u32 & 0xFC)
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}.{}", self.bus, self.device, self.function)
    }
}

/// 32-bit configuration-space accessor
pub trait ConfigSpace: Send + Sync {
    fn read(&self, addr: PciAddress, offset: u8) -> u32;
    fn write(&self, addr: PciAddress, offset: u8, value: u32);

    fn read16(&self, addr: PciAddress, offset: u8) -> u16 {
        let dword = self.read(addr, offset);
        if offset & 2 == 0 {
            (dword & 0xFFFF) as u16
        } else {
            (dword >> 16) as u16
        }
    }

    fn read8(&self, addr: PciAddress, offset: u8) -> u8 {
        let dword = self.read(addr, offset);
        (dword >> ((offset & 3) * 8)) as u8
    }
}

/// Configuration mechanism #1: address port 0xCF8, data port 0xCFC
///
/// The address/data pair is a two-step sequence, so accesses are serialized.
#[cfg(target_arch = "x86_64")]
pub struct PortConfigSpace {
    lock: spin::Mutex<()>,
}

#[cfg(target_arch = "x86_64")]
impl PortConfigSpace {
    pub const fn new() -> Self {
        Self {
            lock: spin::Mutex::new(()),
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl ConfigSpace for PortConfigSpace {
    fn read(&self, addr: PciAddress, offset: u8) -> u32 {
        use x86_64::instructions::port::Port;

        let _guard = self.lock.lock();
        let value = unsafe {
            Port::<u32>::new(0xCF8).write(addr.config_address(offset));
            Port::<u32>::new(0xCFC).read()
        };
        log::trace!("pci: {} [{:#04x}] -> {:#010x}", addr, offset, value);
        value
    }

    fn write(&self, addr: PciAddress, offset: u8, value: u32) {
        use x86_64::instructions::port::Port;

        let _guard = self.lock.lock();
        unsafe {
            Port::<u32>::new(0xCF8).write(addr.config_address(offset));
            Port::<u32>::new(0xCFC).write(value);
        }
    }
}

/// Kind of window a base address register describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Io,
    Memory { wide: bool, prefetchable: bool },
}

/// One decoded base address register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRegion {
    /// BAR slot the region starts at
    pub index: u8,
    pub kind: RegionKind,
    pub base: u64,
    pub size: u64,
}

impl ResourceRegion {
    pub fn is_io(&self) -> bool {
        self.kind == RegionKind::Io
    }

    pub fn is_memory(&self) -> bool {
        matches!(self.kind, RegionKind::Memory { .. })
    }
}

/// A present function and everything discovered about it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFunction {
    pub address: PciAddress,
    pub vendor_id: u16,
    pub device_id: u16,
    pub class_code: u8,
    pub subclass: u8,
    pub prog_if: u8,
    pub header_type: u8,
    /// Indexed by BAR slot; the upper half of a 64-bit BAR stays `None`
    pub regions: [Option<ResourceRegion>; BAR_COUNT],
    pub interrupt_line: u8,
    pub interrupt_pin: u8,
}

impl BusFunction {
    pub fn io_regions(&self) -> impl Iterator<Item = &ResourceRegion> {
        self.regions.iter().flatten().filter(|r| r.is_io())
    }

    pub fn memory_regions(&self) -> impl Iterator<Item = &ResourceRegion> {
        self.regions.iter().flatten().filter(|r| r.is_memory())
    }
}

/// Human-readable name for a base class code
pub fn class_name(class_code: u8) -> &'static str {
    match class_code {
        0x00 => "Unclassified",
        0x01 => "Mass Storage",
        0x02 => "Network",
        0x03 => "Display",
        0x04 => "Multimedia",
        0x05 => "Memory",
        0x06 => "Bridge",
        _ => "Other",
    }
}
