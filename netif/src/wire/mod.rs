// Frame codec: address text forms, byte-order helpers and the Ethernet+ARP layout

pub mod address;
pub mod arp;

pub use address::{ip_text_to_u32, mac_to_text, text_to_mac, u32_to_ip_text, IpText, MacAddress, MacText};
pub use arp::{ArpOperation, EthernetArpFrame};

/// EtherType for ARP
pub const ETHERTYPE_ARP: u16 = 0x0806;

/// EtherType for IPv4
pub const ETHERTYPE_IPV4: u16 = 0x0800;

/// Convert a 16-bit value from host to network byte order.
#[inline]
pub const fn hton16(value: u16) -> u16 {
    value.to_be()
}

/// Convert a 16-bit value from network to host byte order.
#[inline]
pub const fn ntoh16(value: u16) -> u16 {
    u16::from_be(value)
}

/// Convert a 32-bit value from host to network byte order.
#[inline]
pub const fn hton32(value: u32) -> u32 {
    value.to_be()
}

/// Convert a 32-bit value from network to host byte order.
#[inline]
pub const fn ntoh32(value: u32) -> u32 {
    u32::from_be(value)
}
