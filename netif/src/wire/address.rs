// Text and binary forms of hardware and IPv4 addresses

use crate::error::NetError;
use core::fmt::{self, Write};
use core::str::FromStr;

/// Fixed-capacity text form of a MAC address (`XX:XX:XX:XX:XX:XX`)
pub type MacText = heapless::String<17>;

/// Fixed-capacity text form of an IPv4 address (`255.255.255.255`)
pub type IpText = heapless::String<15>;

/// Length of the colon-hex MAC text form
pub const MAC_TEXT_LEN: usize = 17;

/// 48-bit IEEE 802 hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Broadcast address (all ones)
    pub const BROADCAST: MacAddress = MacAddress([0xFF; 6]);

    /// Unspecified address (all zeros)
    pub const ZERO: MacAddress = MacAddress([0; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        text_to_mac(s).map(MacAddress)
    }
}

/// Render a MAC address as six uppercase hex octets joined by `:`.
pub fn mac_to_text(mac: &[u8; 6]) -> MacText {
    let mut text = MacText::new();
    // 17 bytes always fit the 17-byte capacity
    let _ = write!(text, "{}", MacAddress(*mac));
    text
}

/// Parse the `XX:XX:XX:XX:XX:XX` form back into six octets.
///
/// Hex digits may be upper or lower case. Anything else, including a
/// trailing NUL or missing separator, fails with `MalformedAddress`.
pub fn text_to_mac(text: &str) -> Result<[u8; 6], NetError> {
    let bytes = text.as_bytes();
    if bytes.len() != MAC_TEXT_LEN {
        return Err(NetError::MalformedAddress);
    }

    let mut mac = [0u8; 6];
    for (i, octet) in mac.iter_mut().enumerate() {
        let at = i * 3;
        if i < 5 && bytes[at + 2] != b':' {
            return Err(NetError::MalformedAddress);
        }
        let hi = hex_value(bytes[at]).ok_or(NetError::MalformedAddress)?;
        let lo = hex_value(bytes[at + 1]).ok_or(NetError::MalformedAddress)?;
        *octet = (hi << 4) | lo;
    }
    Ok(mac)
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Parse dotted-decimal IPv4 text.
///
/// The result is the numeric big-endian value of the address, so
/// `"192.168.2.1"` becomes `0xC0A8_0201`. The wire form is
/// `value.to_be_bytes()`.
pub fn ip_text_to_u32(text: &str) -> Result<u32, NetError> {
    let mut octets = [0u8; 4];
    let mut parts = text.split('.');

    for octet in octets.iter_mut() {
        let part = parts.next().ok_or(NetError::MalformedAddress)?;
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NetError::MalformedAddress);
        }
        let value = part
            .bytes()
            .fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0'));
        *octet = u8::try_from(value).map_err(|_| NetError::MalformedAddress)?;
    }

    if parts.next().is_some() {
        return Err(NetError::MalformedAddress);
    }
    Ok(u32::from_be_bytes(octets))
}

/// Render an IPv4 address in dotted-decimal form.
pub fn u32_to_ip_text(value: u32) -> IpText {
    let [a, b, c, d] = value.to_be_bytes();
    let mut text = IpText::new();
    let _ = write!(text, "{}.{}.{}.{}", a, b, c, d);
    text
}
