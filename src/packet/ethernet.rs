//! Ethernet II header view.

use crate::error::DecodeError;
use crate::packet::{read_u16, ProtocolTag};

/// Ethernet header length (destination MAC + source MAC + EtherType).
pub const HEADER_LEN: usize = 14;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;
pub const ETHERTYPE_IPV6: u16 = 0x86DD;
/// Vendor tag that wraps a complete inner Ethernet frame.
pub const ETHERTYPE_TAGGED: u16 = 0x9809;
/// The same tag with its bytes swapped; both are seen on the wire.
pub const ETHERTYPE_TAGGED_SWAPPED: u16 = 0x0908;

pub type MacAddr = [u8; 6];

/// Render a MAC address as `aa:bb:cc:dd:ee:ff`.
pub fn format_mac(mac: &MacAddr) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse `aa:bb:cc:dd:ee:ff` (or `-` separated) into a MAC address.
pub fn parse_mac(text: &str) -> Option<MacAddr> {
    let mut mac = [0u8; 6];
    let mut parts = text.split([':', '-']);
    for byte in mac.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}

/// Ethernet header over the bytes of one Ethernet (or tagged inner Ethernet) layer.
#[derive(Debug)]
pub struct Ethernet<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> Ethernet<B> {
    pub fn new_checked(buf: B) -> Result<Self, DecodeError> {
        Self::new_checked_as(buf, ProtocolTag::RawEthernet)
    }

    /// Like `new_checked`, reporting truncation against `protocol` (the
    /// inner header of a tagged frame is decoded as `TaggedEthernet`).
    pub fn new_checked_as(buf: B, protocol: ProtocolTag) -> Result<Self, DecodeError> {
        let available = buf.as_ref().len();
        if available < HEADER_LEN {
            return Err(DecodeError::Truncated {
                protocol,
                needed: HEADER_LEN,
                available,
            });
        }
        Ok(Self { buf })
    }

    pub fn destination(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buf.as_ref()[0..6]);
        mac
    }

    pub fn source(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buf.as_ref()[6..12]);
        mac
    }

    pub fn ether_type(&self) -> u16 {
        read_u16(self.buf.as_ref(), 12)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Ethernet<B> {
    pub fn set_destination(&mut self, mac: MacAddr) {
        self.buf.as_mut()[0..6].copy_from_slice(&mac);
    }

    pub fn set_source(&mut self, mac: MacAddr) {
        self.buf.as_mut()[6..12].copy_from_slice(&mac);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_read_at_fixed_offsets() {
        let mut hdr = [0u8; HEADER_LEN];
        hdr[0..6].copy_from_slice(&[1, 2, 3, 4, 5, 6]);
        hdr[6..12].copy_from_slice(&[7, 8, 9, 10, 11, 12]);
        hdr[12] = 0x08;
        hdr[13] = 0x06;
        let eth = Ethernet::new_checked(&hdr[..]).unwrap();
        assert_eq!(eth.destination(), [1, 2, 3, 4, 5, 6]);
        assert_eq!(eth.source(), [7, 8, 9, 10, 11, 12]);
        assert_eq!(eth.ether_type(), ETHERTYPE_ARP);
    }

    #[test]
    fn test_short_header_is_truncated() {
        let err = Ethernet::new_checked(&[0u8; 13][..]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { needed: 14, available: 13, .. }));
    }

    #[test]
    fn test_set_source_rewrites_bytes() {
        let mut hdr = [0u8; HEADER_LEN];
        let mut eth = Ethernet::new_checked(&mut hdr[..]).unwrap();
        eth.set_source([0xaa; 6]);
        assert_eq!(eth.source(), [0xaa; 6]);
        assert_eq!(hdr[6..12], [0xaa; 6]);
    }

    #[test]
    fn test_format_mac() {
        assert_eq!(format_mac(&[0, 0x1b, 0x2c, 0xff, 0x0a, 1]), "00:1b:2c:ff:0a:01");
    }

    #[test]
    fn test_parse_mac_accepts_both_separators() {
        let mac = [0, 0x1b, 0x2c, 0xff, 0x0a, 1];
        assert_eq!(parse_mac("00:1b:2c:ff:0a:01"), Some(mac));
        assert_eq!(parse_mac("00-1B-2C-FF-0A-01"), Some(mac));
        assert_eq!(parse_mac("00:1b:2c:ff:0a"), None);
        assert_eq!(parse_mac("00:1b:2c:ff:0a:01:02"), None);
        assert_eq!(parse_mac("00:1b:2c:ff:0a:zz"), None);
    }
}
