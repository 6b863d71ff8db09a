// ARP resolution over registered interfaces
//
// A resolution broadcasts a request on the named interface and sleeps on the
// scheduler until the receive path hands back a matching reply or the caller's
// timeout expires. Replies arrive through the engine's FrameSink impl, which
// the interrupt router feeds. Callers asking for the same address on the same
// interface share one outstanding request; other interfaces resolve on their own.

use crate::config::ArpConfig;
use crate::drivers::FrameSink;
use crate::error::NetError;
use crate::hal::{without_interrupts, Scheduler, WaitKey};
use crate::registry::{InterfaceName, NicCapability, NicRegistry};
use crate::wire::address::MAC_TEXT_LEN;
use crate::wire::arp::HTYPE_ETHERNET;
use crate::wire::{
    ip_text_to_u32, mac_to_text, u32_to_ip_text, ArpOperation, EthernetArpFrame, MacAddress, MacText, ETHERTYPE_ARP,
    ETHERTYPE_IPV4,
};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use log::{debug, info, trace, warn};
use spin::Mutex;

/// Tag that keeps ARP wait keys apart from other sleepers
const WAIT_KEY_TAG: WaitKey = 0x4152_5000_0000_0000;

fn wait_key(interface: &str, target_ip: u32) -> WaitKey {
    // The name is folded into the spare byte; a collision only costs a spurious wake
    let fold = interface.bytes().fold(0u8, |acc, b| acc.rotate_left(3) ^ b);
    WAIT_KEY_TAG | (WaitKey::from(fold) << 32) | WaitKey::from(target_ip)
}

/// Resolutions are per interface: the same address may live on two links
type PendingKey = (InterfaceName, u32);

fn pending_key(interface: &str, target_ip: u32) -> PendingKey {
    // Registered names always fit; anything longer matches no entry
    (InterfaceName::try_from(interface).unwrap_or_default(), target_ip)
}

/// Build a broadcast who-has request from textual addresses.
pub fn build_request(
    sender_mac: MacAddress,
    sender_ip: &str,
    target_ip: &str,
) -> Result<EthernetArpFrame, NetError> {
    let sender_ip = ip_text_to_u32(sender_ip)?;
    let target_ip = ip_text_to_u32(target_ip)?;
    Ok(EthernetArpFrame::request(sender_mac, sender_ip, target_ip))
}

/// What a reply to one of our requests has to look like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyExpectation {
    pub local_mac: MacAddress,
    pub local_ip: u32,
    pub target_ip: u32,
}

/// Check that `frame` answers the request described by `expected` and
/// return the resolved hardware address.
pub fn validate_reply(frame: &EthernetArpFrame, expected: &ReplyExpectation) -> Result<MacAddress, NetError> {
    if frame.ethertype != ETHERTYPE_ARP {
        return Err(NetError::ProtocolMismatch("not an ARP frame"));
    }
    if frame.hardware_type != HTYPE_ETHERNET || frame.hardware_len != 6 {
        return Err(NetError::ProtocolMismatch("hardware type is not Ethernet"));
    }
    if frame.protocol_type != ETHERTYPE_IPV4 || frame.protocol_len != 4 {
        return Err(NetError::ProtocolMismatch("protocol type is not IPv4"));
    }
    if frame.operation() != Some(ArpOperation::Reply) {
        return Err(NetError::ProtocolMismatch("not a reply"));
    }
    if frame.sender_ip != expected.target_ip {
        return Err(NetError::ProtocolMismatch("reply is for another address"));
    }
    if frame.target_ip != expected.local_ip {
        return Err(NetError::ProtocolMismatch("reply is addressed to another host"));
    }
    if frame.target_mac != expected.local_mac && !frame.target_mac.is_broadcast() {
        return Err(NetError::ProtocolMismatch("reply is addressed to another interface"));
    }
    if frame.sender_mac.is_zero() || frame.sender_mac.is_broadcast() {
        return Err(NetError::ProtocolMismatch("reply carries no usable address"));
    }
    Ok(frame.sender_mac)
}

/// System-call shaped resolution with the engine's configured timeout.
///
/// See [`ArpEngine::resolve_into`].
pub fn resolve_into<S: Scheduler>(engine: &ArpEngine<S>, interface: &str, target_ip: &str, out: &mut [u8]) -> i32 {
    engine.resolve_into(interface, target_ip, engine.config().timeout_ms, out)
}

/// One outstanding resolution, shared by everyone asking for the same
/// target on the same interface
struct Pending {
    local_mac: MacAddress,
    waiters: usize,
    next_send_ms: u64,
    answer: Option<MacAddress>,
}

/// Replies that found the pending table locked
type Backlog = heapless::mpmc::Q8<(InterfaceName, EthernetArpFrame)>;

/// What a resolver does after looking at its entry
enum Step {
    Done(Result<MacAddress, NetError>),
    Wait { send: bool, wake_at: u64 },
}

/// Resolves IPv4 addresses and answers requests for the local address
///
/// Thread context takes the pending table only with interrupts masked. The
/// receive path never waits for it: a reply that finds it locked goes to a
/// lock-free backlog that the next resolver step drains.
pub struct ArpEngine<S: Scheduler> {
    registry: Arc<NicRegistry>,
    scheduler: S,
    local_ip: u32,
    config: ArpConfig,
    pending: Mutex<BTreeMap<PendingKey, Pending>>,
    backlog: Backlog,
}

impl<S: Scheduler> ArpEngine<S> {
    pub fn new(registry: Arc<NicRegistry>, scheduler: S, local_ip: u32, config: ArpConfig) -> Self {
        Self {
            registry,
            scheduler,
            local_ip,
            config,
            pending: Mutex::new(BTreeMap::new()),
            backlog: Backlog::new(),
        }
    }

    pub fn local_ip(&self) -> u32 {
        self.local_ip
    }

    pub fn config(&self) -> &ArpConfig {
        &self.config
    }

    /// Resolutions in progress, across all interfaces
    pub fn pending(&self) -> usize {
        without_interrupts(|| self.pending.lock().len())
    }

    /// Resolve a dotted-quad address on `interface` to colon-separated
    /// uppercase hex.
    pub fn resolve(&self, interface: &str, target_ip: &str, timeout_ms: u64) -> Result<MacText, NetError> {
        let nic = self.registry.lookup(interface)?;
        let target = ip_text_to_u32(target_ip)?;
        let mac = self.resolve_on(&nic, target, timeout_ms)?;
        Ok(mac_to_text(&mac.0))
    }

    /// Resolve with the configured timeout.
    pub fn resolve_default(&self, interface: &str, target_ip: &str) -> Result<MacText, NetError> {
        self.resolve(interface, target_ip, self.config.timeout_ms)
    }

    /// Resolve and write the NUL-terminated text form into `out`.
    ///
    /// Returns 0 on success or a negative error code. `out` is untouched on
    /// failure.
    pub fn resolve_into(&self, interface: &str, target_ip: &str, timeout_ms: u64, out: &mut [u8]) -> i32 {
        let needed = MAC_TEXT_LEN + 1;
        if out.len() < needed {
            return NetError::BufferTooSmall { needed }.errno();
        }
        match self.resolve(interface, target_ip, timeout_ms) {
            Ok(text) => {
                out[..MAC_TEXT_LEN].copy_from_slice(text.as_bytes());
                out[MAC_TEXT_LEN] = 0;
                0
            }
            Err(err) => {
                debug!("arp: {} on {}: {}", target_ip, interface, err);
                err.errno()
            }
        }
    }

    fn resolve_on(&self, nic: &NicCapability, target: u32, timeout_ms: u64) -> Result<MacAddress, NetError> {
        let key = pending_key(nic.name(), target);
        let start = self.scheduler.now_ms();
        let deadline = start.saturating_add(timeout_ms);
        self.join(&key, nic.mac(), start);

        let result = self.wait_for_reply(nic, &key, start, deadline);

        self.leave(&key);
        match &result {
            Ok(mac) => info!("arp: {} is at {} on {}", u32_to_ip_text(target), mac, nic.name()),
            Err(err) => warn!("arp: {} on {}: {}", u32_to_ip_text(target), nic.name(), err),
        }
        result
    }

    fn join(&self, key: &PendingKey, local_mac: MacAddress, now: u64) {
        without_interrupts(|| {
            let mut pending = self.pending.lock();
            // Leftovers must not land on an entry created after they arrived
            self.drain_backlog(&mut pending);
            let entry = pending.entry(key.clone()).or_insert_with(|| Pending {
                local_mac,
                waiters: 0,
                next_send_ms: now,
                answer: None,
            });
            entry.waiters += 1;
            if entry.waiters > 1 {
                debug!("arp: joining resolution of {} on {}", u32_to_ip_text(key.1), key.0);
            }
        });
    }

    fn leave(&self, key: &PendingKey) {
        without_interrupts(|| {
            let mut pending = self.pending.lock();
            if let Some(entry) = pending.get_mut(key) {
                entry.waiters -= 1;
                if entry.waiters == 0 {
                    pending.remove(key);
                }
            }
        });
    }

    fn wait_for_reply(
        &self,
        nic: &NicCapability,
        key: &PendingKey,
        start: u64,
        deadline: u64,
    ) -> Result<MacAddress, NetError> {
        let target = key.1;
        let request = EthernetArpFrame::request(nic.mac(), self.local_ip, target).to_bytes();
        let wait = wait_key(nic.name(), target);

        loop {
            let now = self.scheduler.now_ms();
            // Decide under the lock, send and sleep without it
            let step = without_interrupts(|| {
                let mut pending = self.pending.lock();
                self.drain_backlog(&mut pending);
                let Some(entry) = pending.get_mut(key) else {
                    return Step::Done(Err(NetError::ResolutionTimeout { waited_ms: now - start }));
                };
                if let Some(mac) = entry.answer {
                    return Step::Done(Ok(mac));
                }
                if now >= deadline {
                    return Step::Done(Err(NetError::ResolutionTimeout { waited_ms: now - start }));
                }
                let send = now >= entry.next_send_ms;
                if send {
                    entry.next_send_ms = now.saturating_add(self.config.retransmit_ms.max(1));
                }
                Step::Wait {
                    send,
                    wake_at: entry.next_send_ms.min(deadline),
                }
            });
            let (send, wake_at) = match step {
                Step::Done(result) => return result,
                Step::Wait { send, wake_at } => (send, wake_at),
            };

            if send {
                trace!("arp: who-has {} via {}", u32_to_ip_text(target), nic.name());
                match nic.send(&request) {
                    Ok(()) => {}
                    Err(NetError::DeviceDown) => return Err(NetError::NoSuchInterface),
                    // Try again at the next retransmit
                    Err(err) => debug!("arp: request on {} not sent: {}", nic.name(), err),
                }
            }

            self.scheduler.block(wait, wake_at);
        }
    }

    fn answer_request(&self, interface: &str, request: &EthernetArpFrame) {
        if request.target_ip != self.local_ip || request.sender_ip == self.local_ip {
            return;
        }
        let Ok(nic) = self.registry.lookup(interface) else {
            return;
        };
        let reply = EthernetArpFrame::reply_to(request, nic.mac()).to_bytes();
        // The asker retransmits if this one is lost
        match nic.try_send(&reply) {
            Ok(()) => debug!(
                "arp: told {} ({}) we are at {}",
                u32_to_ip_text(request.sender_ip),
                request.sender_mac,
                nic.mac()
            ),
            Err(err) => debug!("arp: reply on {} not sent: {}", interface, err),
        }
    }

    fn accept_reply(&self, interface: &str, reply: &EthernetArpFrame) {
        let Some(mut pending) = self.pending.try_lock() else {
            let name = InterfaceName::try_from(interface).unwrap_or_default();
            if self.backlog.enqueue((name, *reply)).is_err() {
                debug!("arp: reply from {} dropped, backlog full", u32_to_ip_text(reply.sender_ip));
                return;
            }
            // Make the owner look again once it lets go of the table
            self.scheduler.wake(wait_key(interface, reply.sender_ip));
            return;
        };
        self.drain_backlog(&mut pending);
        self.apply_reply(&mut pending, interface, reply);
    }

    fn drain_backlog(&self, pending: &mut BTreeMap<PendingKey, Pending>) {
        while let Some((interface, reply)) = self.backlog.dequeue() {
            self.apply_reply(pending, &interface, &reply);
        }
    }

    fn apply_reply(&self, pending: &mut BTreeMap<PendingKey, Pending>, interface: &str, reply: &EthernetArpFrame) {
        let Some(entry) = pending.get_mut(&pending_key(interface, reply.sender_ip)) else {
            trace!("arp: unsolicited reply from {} on {}", u32_to_ip_text(reply.sender_ip), interface);
            return;
        };

        let expected = ReplyExpectation {
            local_mac: entry.local_mac,
            local_ip: self.local_ip,
            target_ip: reply.sender_ip,
        };
        match validate_reply(reply, &expected) {
            Ok(mac) => {
                entry.answer = Some(mac);
                self.scheduler.wake(wait_key(interface, reply.sender_ip));
            }
            Err(err) => debug!("arp: dropped reply on {}: {}", interface, err),
        }
    }
}

impl<S: Scheduler> FrameSink for ArpEngine<S> {
    fn deliver(&self, interface: &str, frame: &[u8]) {
        let Ok(arp) = EthernetArpFrame::parse(frame) else {
            return;
        };
        if arp.ethertype != ETHERTYPE_ARP {
            return;
        }
        match arp.operation() {
            Some(ArpOperation::Request) => self.answer_request(interface, &arp),
            Some(ArpOperation::Reply) => self.accept_reply(interface, &arp),
            None => debug!("arp: unknown operation {} on {}", arp.operation, interface),
        }
    }
}
