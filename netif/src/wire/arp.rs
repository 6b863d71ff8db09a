// Ethernet + ARP frame layout (RFC 826, Ethernet/IPv4 only)

use super::{hton16, hton32, ntoh16, ntoh32, MacAddress, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use crate::error::NetError;

/// Meaningful bytes in an Ethernet header followed by an Ethernet/IPv4 ARP body
pub const FRAME_LEN: usize = 42;

/// Transmit buffer length; the tail is zero padding
pub const FRAME_BUFFER_LEN: usize = 44;

/// ARP hardware type for Ethernet
pub const HTYPE_ETHERNET: u16 = 1;

/// ARP operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ArpOperation {
    Request = 1,
    Reply = 2,
}

/// One Ethernet frame carrying an ARP packet.
///
/// Multi-byte protocol fields hold host-order values; `to_bytes` and
/// `parse` perform the network byte-order conversion. Protocol addresses
/// use the numeric big-endian convention of [`super::ip_text_to_u32`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetArpFrame {
    pub destination: MacAddress,
    pub source: MacAddress,
    pub ethertype: u16,
    pub hardware_type: u16,
    pub protocol_type: u16,
    pub hardware_len: u8,
    pub protocol_len: u8,
    pub operation: u16,
    pub sender_mac: MacAddress,
    pub sender_ip: u32,
    pub target_mac: MacAddress,
    pub target_ip: u32,
}

impl EthernetArpFrame {
    /// Broadcast "who has `target_ip`" from the given sender identity.
    pub fn request(sender_mac: MacAddress, sender_ip: u32, target_ip: u32) -> Self {
        Self {
            destination: MacAddress::BROADCAST,
            source: sender_mac,
            ethertype: ETHERTYPE_ARP,
            hardware_type: HTYPE_ETHERNET,
            protocol_type: ETHERTYPE_IPV4,
            hardware_len: 6,
            protocol_len: 4,
            operation: ArpOperation::Request as u16,
            sender_mac,
            sender_ip,
            target_mac: MacAddress::ZERO,
            target_ip,
        }
    }

    /// The unicast answer the owner of `request.target_ip` sends back.
    pub fn reply_to(request: &EthernetArpFrame, responder_mac: MacAddress) -> Self {
        Self {
            destination: request.sender_mac,
            source: responder_mac,
            operation: ArpOperation::Reply as u16,
            sender_mac: responder_mac,
            sender_ip: request.target_ip,
            target_mac: request.sender_mac,
            target_ip: request.sender_ip,
            ..*request
        }
    }

    pub fn operation(&self) -> Option<ArpOperation> {
        match self.operation {
            1 => Some(ArpOperation::Request),
            2 => Some(ArpOperation::Reply),
            _ => None,
        }
    }

    /// Serialize into the 44-byte transmit layout.
    pub fn to_bytes(&self) -> [u8; FRAME_BUFFER_LEN] {
        let mut buf = [0u8; FRAME_BUFFER_LEN];
        buf[0..6].copy_from_slice(&self.destination.0);
        buf[6..12].copy_from_slice(&self.source.0);
        buf[12..14].copy_from_slice(&hton16(self.ethertype).to_ne_bytes());
        buf[14..16].copy_from_slice(&hton16(self.hardware_type).to_ne_bytes());
        buf[16..18].copy_from_slice(&hton16(self.protocol_type).to_ne_bytes());
        buf[18] = self.hardware_len;
        buf[19] = self.protocol_len;
        buf[20..22].copy_from_slice(&hton16(self.operation).to_ne_bytes());
        buf[22..28].copy_from_slice(&self.sender_mac.0);
        buf[28..32].copy_from_slice(&hton32(self.sender_ip).to_ne_bytes());
        buf[32..38].copy_from_slice(&self.target_mac.0);
        buf[38..42].copy_from_slice(&hton32(self.target_ip).to_ne_bytes());
        buf
    }

    /// Decode the fixed layout. Field values are not validated here.
    pub fn parse(bytes: &[u8]) -> Result<Self, NetError> {
        if bytes.len() < FRAME_LEN {
            return Err(NetError::ProtocolMismatch("frame shorter than Ethernet+ARP header"));
        }
        Ok(Self {
            destination: MacAddress(mac_at(bytes, 0)),
            source: MacAddress(mac_at(bytes, 6)),
            ethertype: u16_at(bytes, 12),
            hardware_type: u16_at(bytes, 14),
            protocol_type: u16_at(bytes, 16),
            hardware_len: bytes[18],
            protocol_len: bytes[19],
            operation: u16_at(bytes, 20),
            sender_mac: MacAddress(mac_at(bytes, 22)),
            sender_ip: u32_at(bytes, 28),
            target_mac: MacAddress(mac_at(bytes, 32)),
            target_ip: u32_at(bytes, 38),
        })
    }
}

fn mac_at(bytes: &[u8], at: usize) -> [u8; 6] {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&bytes[at..at + 6]);
    mac
}

fn u16_at(bytes: &[u8], at: usize) -> u16 {
    ntoh16(u16::from_ne_bytes([bytes[at], bytes[at + 1]]))
}

fn u32_at(bytes: &[u8], at: usize) -> u32 {
    ntoh32(u32::from_ne_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]))
}
