// Network driver implementations

pub mod e1000;
pub mod interrupts;

use crate::error::NetError;
use crate::wire::MacAddress;
use core::sync::atomic::{AtomicU64, Ordering};

/// Consumer of frames drained from a receive ring
///
/// Called from interrupt context with the receive ring locked. An
/// implementation must not block or spin on a lock thread context holds;
/// transmit with [`NetworkDriver::try_send`].
pub trait FrameSink: Send + Sync {
    /// Accept one frame received on `interface`.
    fn deliver(&self, interface: &str, frame: &[u8]);
}

/// Trait for network drivers
///
/// All controllers expose this shape through a `NicCapability`. Methods take
/// `&self`; drivers lock their own rings so that one context can transmit
/// while the interrupt path drains the receive ring.
pub trait NetworkDriver: Send + Sync {
    /// Send a raw Ethernet frame and wait for the hardware to take it
    ///
    /// # Arguments
    /// * `frame` - The Ethernet frame to send (including Ethernet header)
    ///
    /// # Returns
    /// * `Ok(())` once the controller reports the frame transmitted
    /// * `Err(NetError::RingFull)` if no descriptor slot is free
    fn send(&self, frame: &[u8]) -> Result<(), NetError>;

    /// Queue a frame without waiting for the ring lock or for completion
    ///
    /// Usable from interrupt context. Fails with `RingFull` when the ring
    /// is busy or has no free slot.
    fn try_send(&self, frame: &[u8]) -> Result<(), NetError>;

    /// Drain every completed receive descriptor into `sink`
    ///
    /// # Returns
    /// The number of frames delivered
    fn receive(&self, sink: &dyn FrameSink) -> Result<usize, NetError>;

    /// Acknowledge a device interrupt and service its causes
    ///
    /// # Returns
    /// The number of frames delivered to `sink`
    fn handle_interrupt(&self, sink: &dyn FrameSink) -> Result<usize, NetError>;

    /// Get the MAC address of the network interface
    fn mac_address(&self) -> MacAddress;

    /// Attached and not shut down
    fn is_ready(&self) -> bool;

    /// Check if the network link is up
    fn is_link_up(&self) -> bool;

    /// Quiesce the rings and release their buffers. Idempotent.
    fn shutdown(&self);

    /// Snapshot of the interface counters
    fn stats(&self) -> NicStatsSnapshot;
}

/// Lock-free interface counters
#[derive(Debug, Default)]
pub struct NicStats {
    pub tx_packets: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub tx_ring_full: AtomicU64,
    pub rx_packets: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub rx_errors: AtomicU64,
}

impl NicStats {
    pub const fn new() -> Self {
        Self {
            tx_packets: AtomicU64::new(0),
            tx_bytes: AtomicU64::new(0),
            tx_ring_full: AtomicU64::new(0),
            rx_packets: AtomicU64::new(0),
            rx_bytes: AtomicU64::new(0),
            rx_errors: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_tx(&self, bytes: usize) {
        self.tx_packets.fetch_add(1, Ordering::Relaxed);
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_rx(&self, bytes: usize) {
        self.rx_packets.fetch_add(1, Ordering::Relaxed);
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> NicStatsSnapshot {
        NicStatsSnapshot {
            tx_packets: self.tx_packets.load(Ordering::Relaxed),
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            tx_ring_full: self.tx_ring_full.load(Ordering::Relaxed),
            rx_packets: self.rx_packets.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            rx_errors: self.rx_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`NicStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NicStatsSnapshot {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_ring_full: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_errors: u64,
}
