// Bus walk, BAR sizing and driver dispatch

use super::*;
use crate::config::NetConfig;
use crate::drivers::interrupts::IrqRouter;
use crate::error::NetError;
use crate::hal::Platform;
use crate::registry::{nth_interface_name, InterfaceName, NicCapability, NicRegistry};
use log::{debug, info, warn};

/// Everything a driver's attach routine may touch
pub struct AttachContext<'a> {
    pub config_space: &'a dyn ConfigSpace,
    pub platform: &'a Platform,
    pub registry: &'a NicRegistry,
    pub router: &'a IrqRouter,
    pub config: &'a NetConfig,
}

/// Brings up one matched function and registers it under the given name
pub type AttachFn =
    fn(&BusFunction, &InterfaceName, &AttachContext<'_>) -> Result<NicCapability, NetError>;

/// One row of the static driver match table
pub struct DriverEntry {
    pub vendor_id: u16,
    pub device_id: u16,
    pub name: &'static str,
    pub attach: AttachFn,
}

/// Controllers this layer knows how to drive
pub static DEFAULT_DRIVERS: &[DriverEntry] = &[
    DriverEntry {
        vendor_id: crate::drivers::e1000::VENDOR_INTEL,
        device_id: crate::drivers::e1000::DEVICE_82540EM,
        name: "e1000 (82540EM)",
        attach: crate::drivers::e1000::attach_from_bus,
    },
    DriverEntry {
        vendor_id: crate::drivers::e1000::VENDOR_INTEL,
        device_id: crate::drivers::e1000::DEVICE_82545EM,
        name: "e1000 (82545EM)",
        attach: crate::drivers::e1000::attach_from_bus,
    },
];

/// Outcome of one bus walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnumerationReport {
    /// Device slots with at least one present function
    pub devices: usize,
    /// Present functions across all devices
    pub functions: usize,
    /// Network functions a driver brought up
    pub attached: usize,
    /// Network functions whose driver refused them
    pub failed: usize,
}

/// Walk bus 0, log every present function and attach drivers to network
/// controllers. Attach failures are logged and counted, never propagated.
pub fn enumerate(ctx: &AttachContext<'_>, drivers: &[DriverEntry]) -> EnumerationReport {
    let cfg = ctx.config_space;
    let mut report = EnumerationReport::default();

    for device in 0..32u8 {
        let first = PciAddress::new(0, device, 0);
        let header = cfg.read8(first, REG_HEADER + 2);
        if header & !HEADER_MULTIFUNCTION > 1 {
            // Absent slots read back 0xFF and land here too
            continue;
        }

        let function_count = if header & HEADER_MULTIFUNCTION != 0 { 8 } else { 1 };
        let mut present = false;

        for function in 0..function_count {
            let Some(mut found) = read_function(cfg, PciAddress::new(0, device, function)) else {
                continue;
            };
            present = true;
            report.functions += 1;

            info!(
                "pci: {} {:04x}:{:04x} class {:02x}.{:02x} ({}) irq {} pin {}",
                found.address,
                found.vendor_id,
                found.device_id,
                found.class_code,
                found.subclass,
                class_name(found.class_code),
                found.interrupt_line,
                found.interrupt_pin
            );

            if found.class_code != CLASS_NETWORK || found.header_type & !HEADER_MULTIFUNCTION != 0 {
                continue;
            }

            probe_resources(cfg, &mut found);
            let name = nth_interface_name(&ctx.config.interface, report.attached);
            match dispatch(&found, &name, ctx, drivers) {
                Some(Ok(nic)) => {
                    report.attached += 1;
                    info!("pci: {} attached as {} ({})", found.address, nic.name(), nic.mac());
                }
                Some(Err(err)) => {
                    report.failed += 1;
                    warn!("pci: {} attach failed: {}", found.address, err);
                }
                None => debug!("pci: {} has no matching driver", found.address),
            }
        }

        if present {
            report.devices += 1;
        }
    }

    info!(
        "pci: {} devices, {} functions, {} NICs attached, {} failed",
        report.devices, report.functions, report.attached, report.failed
    );
    report
}

fn read_function(cfg: &dyn ConfigSpace, addr: PciAddress) -> Option<BusFunction> {
    let id = cfg.read(addr, REG_VENDOR_DEVICE);
    let vendor_id = (id & 0xFFFF) as u16;
    if vendor_id == VENDOR_NONE {
        return None;
    }

    let class = cfg.read(addr, REG_CLASS);
    let interrupt = cfg.read(addr, REG_INTERRUPT);

    Some(BusFunction {
        address: addr,
        vendor_id,
        device_id: (id >> 16) as u16,
        class_code: (class >> 24) as u8,
        subclass: (class >> 16) as u8,
        prog_if: (class >> 8) as u8,
        header_type: cfg.read8(addr, REG_HEADER + 2),
        regions: [None; BAR_COUNT],
        interrupt_line: interrupt as u8,
        interrupt_pin: (interrupt >> 8) as u8,
    })
}

/// Size every BAR of `function` with the write-ones/read-back/restore probe.
///
/// Each register holds its original value again when this returns. A 64-bit
/// memory BAR consumes its slot and the next one.
pub fn probe_resources(cfg: &dyn ConfigSpace, function: &mut BusFunction) {
    let addr = function.address;
    let mut slot = 0;

    while slot < BAR_COUNT {
        let offset = REG_BAR0 + (slot as u8) * 4;
        let (original, sizing) = size_register(cfg, addr, offset);
        if sizing == 0 {
            slot += 1;
            continue;
        }

        let mut width = 1;
        let region = if original & 0x1 != 0 {
            let mask = sizing & !0x3;
            ResourceRegion {
                index: slot as u8,
                kind: RegionKind::Io,
                base: u64::from(original & !0x3),
                size: u64::from((!mask).wrapping_add(1) & 0xFFFF),
            }
        } else {
            let prefetchable = original & 0x8 != 0;
            let wide = (original >> 1) & 0x3 == 0x2;
            if wide && slot + 1 < BAR_COUNT {
                width = 2;
                let (upper, upper_sizing) = size_register(cfg, addr, offset + 4);
                let mask = (u64::from(upper_sizing) << 32) | u64::from(sizing & !0xF);
                ResourceRegion {
                    index: slot as u8,
                    kind: RegionKind::Memory { wide: true, prefetchable },
                    base: (u64::from(upper) << 32) | u64::from(original & !0xF),
                    size: (!mask).wrapping_add(1),
                }
            } else {
                if wide {
                    warn!("pci: {} BAR{} claims 64 bits in the last slot", addr, slot);
                }
                let mask = sizing & !0xF;
                ResourceRegion {
                    index: slot as u8,
                    kind: RegionKind::Memory { wide: false, prefetchable },
                    base: u64::from(original & !0xF),
                    size: u64::from((!mask).wrapping_add(1)),
                }
            }
        };

        if region.size == 0 {
            debug!("pci: {} BAR{} decodes no address bits", addr, slot);
        } else {
            if region.base == 0 {
                warn!("pci: {} BAR{} has size {:#x} but no base address", addr, slot, region.size);
            }
            if !region.size.is_power_of_two() {
                warn!("pci: {} BAR{} size {:#x} is not a power of two", addr, slot, region.size);
            }
            debug!(
                "pci: {} BAR{} {:?} base {:#x} size {:#x}",
                addr, slot, region.kind, region.base, region.size
            );
            function.regions[slot] = Some(region);
        }

        slot += width;
    }
}

/// Returns (original, read-back after writing all ones); restores the original.
fn size_register(cfg: &dyn ConfigSpace, addr: PciAddress, offset: u8) -> (u32, u32) {
    let original = cfg.read(addr, offset);
    cfg.write(addr, offset, 0xFFFF_FFFF);
    let sizing = cfg.read(addr, offset);
    cfg.write(addr, offset, original);
    (original, sizing)
}

/// Invoke the attach routine of the first exact (vendor, device) match.
///
/// Returns `None` when no driver claims the function.
pub fn dispatch(
    function: &BusFunction,
    name: &InterfaceName,
    ctx: &AttachContext<'_>,
    drivers: &[DriverEntry],
) -> Option<Result<NicCapability, NetError>> {
    let entry = drivers
        .iter()
        .find(|d| d.vendor_id == function.vendor_id && d.device_id == function.device_id)?;
    debug!("pci: {} matched driver {}", function.address, entry.name);
    Some((entry.attach)(function, name, ctx))
}

/// Turn on I/O decode, memory decode and bus mastering.
pub fn enable_device(cfg: &dyn ConfigSpace, function: &BusFunction) {
    let command = cfg.read16(function.address, REG_COMMAND_STATUS);
    let enabled = command | COMMAND_IO_SPACE | COMMAND_MEMORY_SPACE | COMMAND_BUS_MASTER;
    // Upper half is status; writing zeros leaves its write-one-to-clear bits alone
    cfg.write(function.address, REG_COMMAND_STATUS, u32::from(enabled));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_platform, FakeConfigSpace, FakeFunction};
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn context<'a>(
        cfg: &'a FakeConfigSpace,
        platform: &'a Platform,
        registry: &'a NicRegistry,
        router: &'a IrqRouter,
        config: &'a NetConfig,
    ) -> AttachContext<'a> {
        AttachContext {
            config_space: cfg,
            platform,
            registry,
            router,
            config,
        }
    }

    fn nic_function() -> FakeFunction {
        FakeFunction::new(0x8086, 0x100E, 0x02_00_00_00)
            .with_bar(0, 0xFEBC_0000, 0xFFFE_0000) // 128 KiB memory
            .with_bar(1, 0xC001, 0xFFFF_FFC1) // 64-byte I/O window
            .with_irq(11, 1)
    }

    #[test]
    fn test_probe_sizes_bars_and_restores_originals() {
        let cfg = FakeConfigSpace::new();
        let addr = PciAddress::new(0, 3, 0);
        cfg.insert(addr, nic_function().with_bar(2, 0, 0xFFFF_F000));
        let mut function = read_function(&cfg, addr).unwrap();
        let before: alloc::vec::Vec<u32> =
            (0..6).map(|i| cfg.read(addr, REG_BAR0 + i * 4)).collect();

        probe_resources(&cfg, &mut function);

        let after: alloc::vec::Vec<u32> =
            (0..6).map(|i| cfg.read(addr, REG_BAR0 + i * 4)).collect();
        assert_eq!(before, after);
        assert!(cfg.writes_to(addr, REG_BAR0) >= 2);

        let mem = function.regions[0].unwrap();
        assert_eq!(mem.kind, RegionKind::Memory { wide: false, prefetchable: false });
        assert_eq!(mem.base, 0xFEBC_0000);
        assert_eq!(mem.size, 128 * 1024);

        let io = function.regions[1].unwrap();
        assert!(io.is_io());
        assert_eq!(io.base, 0xC000);
        assert_eq!(io.size, 64);

        // Sized but unprogrammed window is recorded, not fatal
        let unplaced = function.regions[2].unwrap();
        assert_eq!(unplaced.base, 0);
        assert_eq!(unplaced.size, 4096);

        assert!(function.regions[3].is_none());
    }

    #[test]
    fn test_probe_wide_bar_consumes_two_slots() {
        let cfg = FakeConfigSpace::new();
        let addr = PciAddress::new(0, 4, 0);
        cfg.insert(
            addr,
            FakeFunction::new(0x8086, 0x100F, 0x02_00_00_00)
                .with_bar(0, 0xE000_000C, 0xFFF0_000C) // 64-bit prefetchable, 1 MiB
                .with_bar(1, 0x0000_0001, 0xFFFF_FFFF)
                .with_bar(2, 0xD000_0000, 0xFFFF_0000),
        );
        let mut function = read_function(&cfg, addr).unwrap();
        probe_resources(&cfg, &mut function);

        let wide = function.regions[0].unwrap();
        assert_eq!(wide.kind, RegionKind::Memory { wide: true, prefetchable: true });
        assert_eq!(wide.base, 0x1_E000_0000);
        assert_eq!(wide.size, 1 << 20);
        assert!(function.regions[1].is_none());
        assert_eq!(function.regions[2].unwrap().size, 64 * 1024);
        assert_eq!(cfg.read(addr, REG_BAR0 + 4), 1);
    }

    static ATTACHED: AtomicUsize = AtomicUsize::new(0);

    fn refuse(_: &BusFunction, _: &InterfaceName, _: &AttachContext<'_>) -> Result<NicCapability, NetError> {
        ATTACHED.fetch_add(1, Ordering::SeqCst);
        Err(NetError::ResourceMismatch("test driver refuses"))
    }

    #[test]
    fn test_enumerate_walks_functions_and_dispatches() {
        let cfg = FakeConfigSpace::new();
        cfg.insert(PciAddress::new(0, 0, 0), FakeFunction::new(0x8086, 0x1237, 0x06_00_00_00));
        cfg.insert(PciAddress::new(0, 3, 0), nic_function());
        // Multifunction device: function 0 and 2 present, 1 absent
        cfg.insert(
            PciAddress::new(0, 5, 0),
            FakeFunction::new(0x1234, 0x0001, 0x01_00_00_00).multifunction(),
        );
        cfg.insert(PciAddress::new(0, 5, 2), FakeFunction::new(0x1234, 0x0002, 0x04_00_00_00));
        // Function 1 without the multifunction bit on function 0 is never visited
        cfg.insert(PciAddress::new(0, 6, 0), FakeFunction::new(0x1234, 0x0003, 0x03_00_00_00));
        cfg.insert(PciAddress::new(0, 6, 1), FakeFunction::new(0x1234, 0x0004, 0x02_00_00_00));

        let platform = test_platform();
        let registry = NicRegistry::new();
        let router = IrqRouter::new();
        let config = NetConfig::default();
        let drivers = [DriverEntry {
            vendor_id: 0x8086,
            device_id: 0x100E,
            name: "refusing test driver",
            attach: refuse,
        }];

        ATTACHED.store(0, Ordering::SeqCst);
        let report = enumerate(&context(&cfg, &platform, &registry, &router, &config), &drivers);

        assert_eq!(report.devices, 4);
        assert_eq!(report.functions, 5);
        assert_eq!(report.attached, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(ATTACHED.load(Ordering::SeqCst), 1);
        assert!(registry.lookup("mynet0").is_err());
    }

    #[test]
    fn test_dispatch_without_match() {
        let cfg = FakeConfigSpace::new();
        let platform = test_platform();
        let registry = NicRegistry::new();
        let router = IrqRouter::new();
        let config = NetConfig::default();
        let ctx = context(&cfg, &platform, &registry, &router, &config);

        let addr = PciAddress::new(0, 9, 0);
        cfg.insert(addr, FakeFunction::new(0x10EC, 0x8139, 0x02_00_00_00));
        let function = read_function(&cfg, addr).unwrap();
        assert!(dispatch(&function, &config.interface, &ctx, DEFAULT_DRIVERS).is_none());
    }

    #[test]
    fn test_enable_device_sets_command_bits() {
        let cfg = FakeConfigSpace::new();
        let addr = PciAddress::new(0, 3, 0);
        cfg.insert(addr, nic_function());
        let function = read_function(&cfg, addr).unwrap();

        enable_device(&cfg, &function);
        let command = cfg.read16(addr, REG_COMMAND_STATUS);
        assert_eq!(command & 0x7, 0x7);
    }

    #[test]
    fn test_default_table_attaches_real_driver() {
        let cfg = FakeConfigSpace::new();
        // Memory window too small for the controller's register file
        cfg.insert(
            PciAddress::new(0, 3, 0),
            FakeFunction::new(0x8086, 0x100E, 0x02_00_00_00).with_bar(0, 0xFEBC_0000, 0xFFFF_F000),
        );
        let platform = test_platform();
        let registry = NicRegistry::new();
        let router = IrqRouter::new();
        let config = NetConfig::default();

        let report = enumerate(&context(&cfg, &platform, &registry, &router, &config), DEFAULT_DRIVERS);
        assert_eq!(report.failed, 1);
        assert!(registry.is_empty());
        assert_eq!(Arc::strong_count(&platform.pages), 1);
    }
}
