// Intel 8254x (e1000) gigabit Ethernet driver
//
// Legacy descriptors, one 128-slot ring per direction, synchronous transmit
// and interrupt-driven receive.

pub mod regs;
pub mod ring;

use crate::config::E1000Config;
use crate::drivers::{FrameSink, NetworkDriver, NicStats, NicStatsSnapshot};
use crate::error::NetError;
use crate::hal::{without_interrupts, Platform};
use crate::pci::{self, AttachContext, BusFunction, PciAddress, ResourceRegion};
use crate::registry::{InterfaceName, NicCapability};
use crate::wire::MacAddress;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, Ordering};
use log::{debug, info, warn};
use regs::*;
use ring::{RxRing, TxRing, PACKET_BUFFER_SIZE, RING_SIZE};
use spin::Mutex;

/// PCI vendor ID for Intel
pub const VENDOR_INTEL: u16 = 0x8086;

/// 82540EM (QEMU's default e1000)
pub const DEVICE_82540EM: u16 = 0x100E;

/// 82545EM
pub const DEVICE_82545EM: u16 = 0x100F;

// EEPROM read register
const EERD_START: u32 = 1 << 0;
const EERD_DONE: u32 = 1 << 4;
const EERD_ADDR_SHIFT: u32 = 8;
const EERD_DATA_SHIFT: u32 = 16;

/// Resource windows the driver needs, picked out of the function's BARs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resources {
    pub mmio: ResourceRegion,
    pub io_base: Option<u64>,
}

/// Pick the register window (and optional I/O window) out of the BARs.
pub fn classify_resources(function: &BusFunction) -> Result<Resources, NetError> {
    let mmio = *function
        .memory_regions()
        .next()
        .ok_or(NetError::ResourceMismatch("no memory-mapped register window"))?;
    if mmio.size < REGISTER_WINDOW || !mmio.size.is_power_of_two() {
        return Err(NetError::ResourceMismatch("register window smaller than 128 KiB"));
    }
    if mmio.base == 0 {
        return Err(NetError::ResourceMismatch("register window has no base address"));
    }

    let io_base = match function.io_regions().next() {
        Some(io) if io.size >= IO_WINDOW && io.base != 0 => Some(io.base),
        Some(io) => {
            warn!("e1000: {} ignoring I/O window of {} bytes", function.address, io.size);
            None
        }
        None => None,
    };
    Ok(Resources { mmio, io_base })
}

/// Entry in the PCI driver table: enable the function, map its registers
/// and bring the controller up under `name`.
pub fn attach_from_bus(
    function: &BusFunction,
    name: &InterfaceName,
    ctx: &AttachContext<'_>,
) -> Result<NicCapability, NetError> {
    let resources = classify_resources(function)?;
    pci::enable_device(ctx.config_space, function);

    let len = resources.mmio.size as usize;
    let window = ctx
        .platform
        .address_space
        .map_mmio(resources.mmio.base, len)
        .ok_or(NetError::ResourceMismatch("register window could not be mapped"))?;
    // The mapping covers the whole BAR and lives as long as the kernel
    let regs = unsafe { Mmio::new(window, len)? };

    let driver = attach(function, &resources, name, regs, ctx)?;
    Ok(driver.capability())
}

/// Bring a controller up and publish it in the registry and IRQ router.
pub fn attach<R: RegisterBlock + 'static>(
    function: &BusFunction,
    resources: &Resources,
    name: &InterfaceName,
    regs: R,
    ctx: &AttachContext<'_>,
) -> Result<Arc<E1000<R>>, NetError> {
    let driver = Arc::new(E1000::init(function, resources, name, regs, &ctx.config.e1000, ctx.platform)?);

    ctx.router.register(function.interrupt_line, driver.clone());
    ctx.registry.register(driver.capability());
    Ok(driver)
}

/// One e1000 controller
pub struct E1000<R: RegisterBlock> {
    name: InterfaceName,
    address: PciAddress,
    regs: R,
    mac: MacAddress,
    tx: Mutex<Option<TxRing>>,
    rx: Mutex<Option<RxRing>>,
    ready: AtomicBool,
    config: E1000Config,
    stats: NicStats,
}

impl<R: RegisterBlock> E1000<R> {
    /// Reset and program the controller. Nothing else may touch its
    /// registers until this returns.
    pub fn init(
        function: &BusFunction,
        resources: &Resources,
        name: &InterfaceName,
        regs: R,
        config: &E1000Config,
        platform: &Platform,
    ) -> Result<Self, NetError> {
        reset(&regs, config.reset_poll_limit)?;
        regs.set_bits(Reg::Ctrl, CTRL_ASDE | CTRL_SLU);

        let mac = read_mac(&regs, config.reset_poll_limit)?;
        info!("e1000: {} MAC {}", function.address, mac);

        let tx = TxRing::allocate(&platform.pages)?;
        let mut rx = RxRing::allocate(&platform.pages)?;
        rx.arm_all();

        program_rings(&regs, &tx, &rx);
        regs.write(Reg::Tctl, tctl_value());
        regs.write(Reg::Tipg, tipg_value());
        regs.write(Reg::Rctl, rctl_value());

        // Drop anything latched during bring-up before unmasking
        let _ = regs.read(Reg::Icr);
        regs.write(Reg::Ims, INT_ENABLED);
        platform.interrupts.enable(function.interrupt_line);

        info!(
            "e1000: {} up as {} (irq {}, pin {}, regs {:#x}, io {:x?})",
            function.address,
            name,
            function.interrupt_line,
            function.interrupt_pin,
            resources.mmio.base,
            resources.io_base
        );

        Ok(Self {
            name: name.clone(),
            address: function.address,
            regs,
            mac,
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            ready: AtomicBool::new(true),
            config: *config,
            stats: NicStats::new(),
        })
    }

    #[cfg(test)]
    pub(crate) fn registers(&self) -> &R {
        &self.regs
    }

    /// Fill the tail slot and hand it to hardware. Caller holds the ring lock.
    fn publish(&self, ring: &mut TxRing, frame: &[u8]) -> Result<usize, NetError> {
        match ring.push(frame) {
            Ok(slot) => {
                self.regs.write(Reg::Tdt, ring.tail() as u32);
                Ok(slot)
            }
            Err(NetError::RingFull) => {
                self.stats.tx_ring_full.fetch_add(1, Ordering::Relaxed);
                Err(NetError::RingFull)
            }
            Err(err) => Err(err),
        }
    }

    /// Spin until hardware reports `slot` done; the ring lock is only held
    /// for each individual check.
    fn wait_for_completion(&self, slot: usize) -> Result<(), NetError> {
        for _ in 0..self.config.tx_poll_limit {
            let done = without_interrupts(|| {
                let mut guard = self.tx.lock();
                guard.as_mut().map(|ring| ring.complete(slot)).ok_or(NetError::DeviceDown)
            })?;
            if done {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        warn!("e1000: {} transmit slot {} did not complete", self.name, slot);
        Err(NetError::TransmitTimeout)
    }
}

impl<R: RegisterBlock + 'static> E1000<R> {
    pub fn capability(self: &Arc<Self>) -> NicCapability {
        NicCapability::new(self.name.clone(), self.mac, self.clone())
    }
}

impl<R: RegisterBlock> NetworkDriver for E1000<R> {
    fn send(&self, frame: &[u8]) -> Result<(), NetError> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(NetError::DeviceDown);
        }

        let slot = without_interrupts(|| {
            let mut guard = self.tx.lock();
            let ring = guard.as_mut().ok_or(NetError::DeviceDown)?;
            self.publish(ring, frame)
        })?;

        self.wait_for_completion(slot)?;
        self.stats.record_tx(frame.len());
        Ok(())
    }

    fn try_send(&self, frame: &[u8]) -> Result<(), NetError> {
        if !self.ready.load(Ordering::Acquire) {
            return Err(NetError::DeviceDown);
        }

        // The holder may be the context this interrupt preempted
        let Some(mut guard) = self.tx.try_lock() else {
            self.stats.tx_ring_full.fetch_add(1, Ordering::Relaxed);
            return Err(NetError::RingFull);
        };
        let ring = guard.as_mut().ok_or(NetError::DeviceDown)?;
        // Completion is collected when the slot comes round again
        self.publish(ring, frame)?;
        self.stats.record_tx(frame.len());
        Ok(())
    }

    fn receive(&self, sink: &dyn FrameSink) -> Result<usize, NetError> {
        // Also reachable from thread context when polling
        without_interrupts(|| {
            let mut guard = self.rx.lock();
            let ring = guard.as_mut().ok_or(NetError::DeviceDown)?;

            let mut delivered = 0;
            while let Some(descriptor) = ring.completed_at_head() {
                let slot = ring.head();
                ring.buffer_mut(slot).reclaim();

                let len = usize::from(descriptor.length);
                if descriptor.is_end_of_packet() && descriptor.errors == 0 && len <= PACKET_BUFFER_SIZE {
                    sink.deliver(&self.name, ring.buffer(slot).contents(len));
                    self.stats.record_rx(len);
                    delivered += 1;
                } else {
                    self.stats.rx_errors.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        "e1000: {} dropping rx slot {} (status {:#x}, errors {:#x}, len {})",
                        self.name, slot, descriptor.status, descriptor.errors, len
                    );
                }

                ring.rearm(slot);
                ring.advance_head();
                // The slot just recycled becomes the new tail
                self.regs.write(Reg::Rdt, slot as u32);
            }
            Ok(delivered)
        })
    }

    fn handle_interrupt(&self, sink: &dyn FrameSink) -> Result<usize, NetError> {
        if !self.ready.load(Ordering::Acquire) {
            return Ok(0);
        }

        // Reading ICR acknowledges every pending cause
        let causes = self.regs.read(Reg::Icr);
        if causes & INT_LSC != 0 {
            info!("e1000: {} link {}", self.name, if self.is_link_up() { "up" } else { "down" });
        }
        if causes & INT_RXO != 0 {
            warn!("e1000: {} receive overrun", self.name);
        }
        if causes & INT_RX_MASK != 0 {
            self.receive(sink)
        } else {
            Ok(0)
        }
    }

    fn mac_address(&self) -> MacAddress {
        self.mac
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn is_link_up(&self) -> bool {
        self.is_ready() && self.regs.read(Reg::Status) & STATUS_LU != 0
    }

    fn shutdown(&self) {
        if !self.ready.swap(false, Ordering::AcqRel) {
            return;
        }

        // The receive path only ever try-locks the transmit ring, so taking
        // both here with interrupts masked cannot deadlock against it
        without_interrupts(|| {
            let mut tx = self.tx.lock();
            let mut rx = self.rx.lock();

            self.regs.write(Reg::Imc, u32::MAX);
            self.regs.clear_bits(Reg::Tctl, TCTL_EN);
            self.regs.clear_bits(Reg::Rctl, RCTL_EN);
            for reg in [Reg::Tdh, Reg::Tdt, Reg::Rdh, Reg::Rdt, Reg::Tdlen, Reg::Rdlen] {
                self.regs.write(reg, 0);
            }
            let _ = self.regs.read(Reg::Icr);

            // Engines are stopped; the pages can go back to the allocator
            *tx = None;
            *rx = None;
        });

        info!("e1000: {} ({}) shut down", self.name, self.address);
    }

    fn stats(&self) -> NicStatsSnapshot {
        self.stats.snapshot()
    }
}

fn reset<R: RegisterBlock>(regs: &R, poll_limit: u32) -> Result<(), NetError> {
    regs.write(Reg::Imc, u32::MAX);
    regs.set_bits(Reg::Ctrl, CTRL_RST);

    for _ in 0..poll_limit {
        if regs.read(Reg::Ctrl) & CTRL_RST == 0 {
            // Reset re-enables nothing, but mask again in case firmware did
            regs.write(Reg::Imc, u32::MAX);
            return Ok(());
        }
        core::hint::spin_loop();
    }
    Err(NetError::ResetTimeout { polls: poll_limit })
}

/// Burned-in address from RAL0/RAH0, falling back to the EEPROM.
fn read_mac<R: RegisterBlock>(regs: &R, poll_limit: u32) -> Result<MacAddress, NetError> {
    let low = regs.read(Reg::Ral0).to_le_bytes();
    let high = regs.read(Reg::Rah0).to_le_bytes();
    let mac = MacAddress([low[0], low[1], low[2], low[3], high[0], high[1]]);
    if !mac.is_zero() && !mac.is_broadcast() {
        return Ok(mac);
    }

    debug!("e1000: receive address unset, reading EEPROM");
    let mut bytes = [0u8; 6];
    for word in 0..3u32 {
        let value = read_eeprom(regs, word, poll_limit)
            .ok_or(NetError::ResourceMismatch("EEPROM read did not complete"))?;
        bytes[word as usize * 2..word as usize * 2 + 2].copy_from_slice(&value.to_le_bytes());
    }

    let mac = MacAddress(bytes);
    if mac.is_zero() || mac.is_broadcast() {
        return Err(NetError::ResourceMismatch("no burned-in MAC address"));
    }
    // Program it so that unicast receive filtering matches
    regs.write(Reg::Ral0, u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));
    regs.write(Reg::Rah0, u32::from(u16::from_le_bytes([bytes[4], bytes[5]])) | RAH_AV);
    Ok(mac)
}

fn read_eeprom<R: RegisterBlock>(regs: &R, word: u32, poll_limit: u32) -> Option<u16> {
    regs.write(Reg::Eerd, (word << EERD_ADDR_SHIFT) | EERD_START);
    for _ in 0..poll_limit {
        let value = regs.read(Reg::Eerd);
        if value & EERD_DONE != 0 {
            return Some((value >> EERD_DATA_SHIFT) as u16);
        }
        core::hint::spin_loop();
    }
    None
}

fn program_rings<R: RegisterBlock>(regs: &R, tx: &TxRing, rx: &RxRing) {
    regs.write(Reg::Tdbal, tx.base() as u32);
    regs.write(Reg::Tdbah, (tx.base() >> 32) as u32);
    regs.write(Reg::Tdlen, tx.byte_len());
    regs.write(Reg::Tdh, 0);
    regs.write(Reg::Tdt, 0);

    regs.write(Reg::Rdbal, rx.base() as u32);
    regs.write(Reg::Rdbah, (rx.base() >> 32) as u32);
    regs.write(Reg::Rdlen, rx.byte_len());
    regs.write(Reg::Rdh, 0);
    // Hardware owns every receive slot but the one under the tail
    regs.write(Reg::Rdt, (RING_SIZE - 1) as u32);
}
