//! System-call surface of the network layer

use crate::init;
use netif::NetError;

/// Resolve `ip` on `interface` into `out` as a NUL-terminated MAC string.
///
/// Returns 0 on success, otherwise a negative [`NetError::errno`] code.
/// Needs at least 18 bytes of output.
pub fn sys_arp(interface: &str, ip: &str, out: &mut [u8]) -> i32 {
    match init::arp_engine() {
        Some(engine) => netif::resolve_into(engine, interface, ip, out),
        None => NetError::NoSuchInterface.errno(),
    }
}
