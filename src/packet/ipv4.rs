//! IPv4 header view.

use std::net::Ipv4Addr;

use crate::error::DecodeError;
use crate::packet::{read_u16, ProtocolTag};

pub const MIN_HEADER_LEN: usize = 20;

pub const PROTOCOL_ICMP: u8 = 1;
pub const PROTOCOL_TCP: u8 = 6;
pub const PROTOCOL_UDP: u8 = 17;

/// Header length in bytes from the IHL nibble of the first byte.
pub fn header_len(first_byte: u8) -> usize {
    ((first_byte & 0x0F) as usize) * 4
}

#[derive(Debug)]
pub struct Ipv4<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> Ipv4<B> {
    /// Requires the full header (options included) to be present.
    pub fn new_checked(buf: B) -> Result<Self, DecodeError> {
        let b = buf.as_ref();
        let available = b.len();
        if available < MIN_HEADER_LEN {
            return Err(DecodeError::Truncated {
                protocol: ProtocolTag::Ipv4,
                needed: MIN_HEADER_LEN,
                available,
            });
        }
        let needed = header_len(b[0]);
        if needed < MIN_HEADER_LEN || available < needed {
            return Err(DecodeError::Truncated {
                protocol: ProtocolTag::Ipv4,
                needed: needed.max(MIN_HEADER_LEN),
                available,
            });
        }
        Ok(Self { buf })
    }

    pub fn version(&self) -> u8 {
        self.buf.as_ref()[0] >> 4
    }

    pub fn header_len(&self) -> usize {
        header_len(self.buf.as_ref()[0])
    }

    pub fn total_length(&self) -> u16 {
        read_u16(self.buf.as_ref(), 2)
    }

    pub fn ttl(&self) -> u8 {
        self.buf.as_ref()[8]
    }

    pub fn protocol(&self) -> u8 {
        self.buf.as_ref()[9]
    }

    pub fn source(&self) -> Ipv4Addr {
        let b = self.buf.as_ref();
        Ipv4Addr::new(b[12], b[13], b[14], b[15])
    }

    pub fn destination(&self) -> Ipv4Addr {
        let b = self.buf.as_ref();
        Ipv4Addr::new(b[16], b[17], b[18], b[19])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(ihl: u8) -> Vec<u8> {
        let mut h = vec![0u8; (ihl as usize) * 4];
        h[0] = 0x40 | ihl;
        h[2..4].copy_from_slice(&40u16.to_be_bytes());
        h[8] = 64;
        h[9] = PROTOCOL_TCP;
        h[12..16].copy_from_slice(&[10, 0, 0, 1]);
        h[16..20].copy_from_slice(&[10, 0, 0, 2]);
        h
    }

    #[test]
    fn test_fields() {
        let h = header(5);
        let ip = Ipv4::new_checked(&h[..]).unwrap();
        assert_eq!(ip.version(), 4);
        assert_eq!(ip.header_len(), 20);
        assert_eq!(ip.total_length(), 40);
        assert_eq!(ip.ttl(), 64);
        assert_eq!(ip.protocol(), PROTOCOL_TCP);
        assert_eq!(ip.source(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ip.destination(), Ipv4Addr::new(10, 0, 0, 2));
    }

    #[test]
    fn test_options_extend_header_len() {
        let h = header(6);
        assert_eq!(Ipv4::new_checked(&h[..]).unwrap().header_len(), 24);
    }

    #[test]
    fn test_ihl_below_five_is_rejected() {
        let mut h = header(5);
        h[0] = 0x44;
        assert!(Ipv4::new_checked(&h[..]).is_err());
    }

    #[test]
    fn test_options_past_end_are_truncated() {
        let mut h = header(5);
        h[0] = 0x46; // claims 24 bytes, only 20 present
        let err = Ipv4::new_checked(&h[..]).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { needed: 24, available: 20, .. }));
    }
}
