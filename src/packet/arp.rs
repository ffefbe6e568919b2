//! ARP (Ethernet/IPv4) view.
//!
//! The layer spans everything after the Ethernet header, padding included.

use std::net::Ipv4Addr;

use crate::error::DecodeError;
use crate::packet::ethernet::MacAddr;
use crate::packet::ProtocolTag;

/// Bytes needed to reach the end of the target protocol address.
pub const MIN_LEN: usize = 28;

const OPCODE_REQUEST: [u8; 2] = [0x00, 0x01];
const OPCODE_REPLY: [u8; 2] = [0x00, 0x02];

#[derive(Debug)]
pub struct Arp<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> Arp<B> {
    pub fn new_checked(buf: B) -> Result<Self, DecodeError> {
        let available = buf.as_ref().len();
        if available < MIN_LEN {
            return Err(DecodeError::Truncated {
                protocol: ProtocolTag::Arp,
                needed: MIN_LEN,
                available,
            });
        }
        Ok(Self { buf })
    }

    pub fn is_request(&self) -> bool {
        self.buf.as_ref()[6..8] == OPCODE_REQUEST
    }

    pub fn is_reply(&self) -> bool {
        self.buf.as_ref()[6..8] == OPCODE_REPLY
    }

    pub fn sender_mac(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buf.as_ref()[8..14]);
        mac
    }

    /// All zeros for an ARP probe.
    pub fn sender_ip(&self) -> Ipv4Addr {
        let b = self.buf.as_ref();
        Ipv4Addr::new(b[14], b[15], b[16], b[17])
    }

    pub fn target_mac(&self) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buf.as_ref()[18..24]);
        mac
    }

    pub fn target_ip(&self) -> Ipv4Addr {
        let b = self.buf.as_ref();
        Ipv4Addr::new(b[24], b[25], b[26], b[27])
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Arp<B> {
    pub fn set_request(&mut self, request: bool) {
        let op = if request { OPCODE_REQUEST } else { OPCODE_REPLY };
        self.buf.as_mut()[6..8].copy_from_slice(&op);
    }

    pub fn set_sender_mac(&mut self, mac: MacAddr) {
        self.buf.as_mut()[8..14].copy_from_slice(&mac);
    }

    pub fn set_sender_ip(&mut self, ip: Ipv4Addr) {
        self.buf.as_mut()[14..18].copy_from_slice(&ip.octets());
    }

    pub fn set_target_mac(&mut self, mac: MacAddr) {
        self.buf.as_mut()[18..24].copy_from_slice(&mac);
    }

    pub fn set_target_ip(&mut self, ip: Ipv4Addr) {
        self.buf.as_mut()[24..28].copy_from_slice(&ip.octets());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_body() -> [u8; 28] {
        let mut b = [0u8; 28];
        b[0..2].copy_from_slice(&[0x00, 0x01]); // Ethernet
        b[2..4].copy_from_slice(&[0x08, 0x00]); // IPv4
        b[4] = 6;
        b[5] = 4;
        b[6..8].copy_from_slice(&OPCODE_REQUEST);
        b[8..14].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x01]);
        b[14..18].copy_from_slice(&[192, 168, 1, 10]);
        b[24..28].copy_from_slice(&[192, 168, 1, 1]);
        b
    }

    #[test]
    fn test_request_fields() {
        let body = request_body();
        let arp = Arp::new_checked(&body[..]).unwrap();
        assert!(arp.is_request());
        assert!(!arp.is_reply());
        assert_eq!(arp.sender_ip(), Ipv4Addr::new(192, 168, 1, 10));
        assert_eq!(arp.target_ip(), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(arp.sender_mac(), [0x02, 0, 0, 0, 0, 0x01]);
        assert_eq!(arp.target_mac(), [0; 6]);
    }

    #[test]
    fn test_set_request_false_turns_into_reply() {
        let mut body = request_body();
        let mut arp = Arp::new_checked(&mut body[..]).unwrap();
        arp.set_request(false);
        assert!(arp.is_reply());
        assert_eq!(body[6..8], [0x00, 0x02]);
    }

    #[test]
    fn test_setters_write_addresses() {
        let mut body = request_body();
        let mut arp = Arp::new_checked(&mut body[..]).unwrap();
        arp.set_target_ip(Ipv4Addr::new(10, 9, 8, 7));
        arp.set_target_mac([9; 6]);
        arp.set_sender_ip(Ipv4Addr::UNSPECIFIED);
        assert_eq!(arp.target_ip(), Ipv4Addr::new(10, 9, 8, 7));
        assert_eq!(arp.target_mac(), [9; 6]);
        assert_eq!(arp.sender_ip(), Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_short_body_is_truncated() {
        assert!(Arp::new_checked(&[0u8; 27][..]).is_err());
    }
}
