// NIC registry: the one authoritative table of attached interfaces

use crate::drivers::NetworkDriver;
use crate::error::NetError;
use crate::hal::without_interrupts;
use crate::wire::MacAddress;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::Write;
use spin::{Mutex, Once};

/// Interface names are short, fixed-capacity strings such as `mynet0`
pub type InterfaceName = heapless::String<16>;

/// Send/receive capability of one attached controller
#[derive(Clone)]
pub struct NicCapability {
    name: InterfaceName,
    mac: MacAddress,
    driver: Arc<dyn NetworkDriver>,
}

impl NicCapability {
    pub fn new(name: InterfaceName, mac: MacAddress, driver: Arc<dyn NetworkDriver>) -> Self {
        Self { name, mac, driver }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    pub fn driver(&self) -> &Arc<dyn NetworkDriver> {
        &self.driver
    }

    /// Transmit one raw Ethernet frame through the owning driver.
    pub fn send(&self, frame: &[u8]) -> Result<(), NetError> {
        self.driver.send(frame)
    }

    /// Queue one frame without waiting; see [`NetworkDriver::try_send`].
    pub fn try_send(&self, frame: &[u8]) -> Result<(), NetError> {
        self.driver.try_send(frame)
    }
}

impl core::fmt::Debug for NicCapability {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NicCapability")
            .field("name", &self.name)
            .field("mac", &self.mac)
            .field("ready", &self.driver.is_ready())
            .finish()
    }
}

/// Name-keyed table of attached controllers
///
/// The responder looks interfaces up from interrupt context, so the table
/// is only locked with interrupts masked.
pub struct NicRegistry {
    entries: Mutex<BTreeMap<InterfaceName, NicCapability>>,
}

impl NicRegistry {
    pub const fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Insert `nic` under its name, returning the entry it replaced.
    pub fn register(&self, nic: NicCapability) -> Option<NicCapability> {
        log::info!("net: registered {} ({})", nic.name, nic.mac);
        without_interrupts(|| self.entries.lock().insert(nic.name.clone(), nic))
    }

    /// Find a usable interface.
    ///
    /// An entry whose driver has not finished attaching, or has been shut
    /// down, is treated the same as a missing one.
    pub fn lookup(&self, name: &str) -> Result<NicCapability, NetError> {
        let key = InterfaceName::try_from(name).map_err(|_| NetError::NoSuchInterface)?;
        without_interrupts(|| match self.entries.lock().get(&key) {
            Some(nic) if nic.driver.is_ready() => Ok(nic.clone()),
            _ => Err(NetError::NoSuchInterface),
        })
    }

    pub fn remove(&self, name: &str) -> Option<NicCapability> {
        let key = InterfaceName::try_from(name).ok()?;
        without_interrupts(|| self.entries.lock().remove(&key))
    }

    pub fn names(&self) -> Vec<InterfaceName> {
        without_interrupts(|| self.entries.lock().keys().cloned().collect())
    }

    pub fn len(&self) -> usize {
        without_interrupts(|| self.entries.lock().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NicRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static NIC_REGISTRY: Once<Arc<NicRegistry>> = Once::new();

/// Get the global NIC registry
pub fn nic_registry() -> &'static Arc<NicRegistry> {
    NIC_REGISTRY.call_once(|| Arc::new(NicRegistry::new()))
}

/// Name for the `index`-th attached controller given the configured first name.
///
/// `mynet0` yields `mynet0`, `mynet1`, ...; a name without a trailing number
/// gets one appended from 1 on.
pub fn nth_interface_name(first: &InterfaceName, index: usize) -> InterfaceName {
    if index == 0 {
        return first.clone();
    }

    let digits = first.bytes().rev().take_while(u8::is_ascii_digit).count();
    let (prefix, number) = first.split_at(first.len() - digits);
    let start: usize = number.parse().unwrap_or(0);

    let mut name = InterfaceName::new();
    // A name that overflows the capacity is truncated; collisions then replace
    let _ = write!(name, "{}{}", prefix, start + index);
    name
}
