//! IPv6 header view.
//!
//! The fixed 40-byte header is always present. The layer span also covers
//! any hop-by-hop, routing, fragment and destination-options headers that
//! follow it, so the next layer starts at the upper-layer protocol.

use std::net::Ipv6Addr;

use crate::error::DecodeError;
use crate::packet::{read_u16, ProtocolTag};

pub const FIXED_HEADER_LEN: usize = 40;

pub const NEXT_HOP_BY_HOP: u8 = 0;
pub const NEXT_ROUTING: u8 = 43;
pub const NEXT_FRAGMENT: u8 = 44;
pub const NEXT_DEST_OPTS: u8 = 60;
pub const NEXT_ICMPV6: u8 = 58;

const FRAGMENT_HEADER_LEN: usize = 8;

/// Walk the extension headers starting after the fixed header.
/// Returns the full header length and the upper-layer protocol number.
pub fn header_chain(buf: &[u8]) -> Result<(usize, u8), DecodeError> {
    let available = buf.len();
    if available < FIXED_HEADER_LEN {
        return Err(DecodeError::Truncated {
            protocol: ProtocolTag::Ipv6,
            needed: FIXED_HEADER_LEN,
            available,
        });
    }
    let mut next = buf[6];
    let mut offset = FIXED_HEADER_LEN;
    loop {
        let ext_len = match next {
            NEXT_HOP_BY_HOP | NEXT_ROUTING | NEXT_DEST_OPTS => {
                if available < offset + 2 {
                    return Err(DecodeError::Truncated {
                        protocol: ProtocolTag::Ipv6,
                        needed: offset + 2,
                        available,
                    });
                }
                (buf[offset + 1] as usize + 1) * 8
            }
            NEXT_FRAGMENT => FRAGMENT_HEADER_LEN,
            upper => return Ok((offset, upper)),
        };
        if available < offset + ext_len {
            return Err(DecodeError::Truncated {
                protocol: ProtocolTag::Ipv6,
                needed: offset + ext_len,
                available,
            });
        }
        next = buf[offset];
        offset += ext_len;
    }
}

#[derive(Debug)]
pub struct Ipv6<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> Ipv6<B> {
    pub fn new_checked(buf: B) -> Result<Self, DecodeError> {
        header_chain(buf.as_ref())?;
        Ok(Self { buf })
    }

    pub fn version(&self) -> u8 {
        self.buf.as_ref()[0] >> 4
    }

    pub fn payload_length(&self) -> u16 {
        read_u16(self.buf.as_ref(), 4)
    }

    /// Next-header field of the fixed header.
    pub fn next_header(&self) -> u8 {
        self.buf.as_ref()[6]
    }

    pub fn hop_limit(&self) -> u8 {
        self.buf.as_ref()[7]
    }

    pub fn source(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.buf.as_ref()[8..24]);
        Ipv6Addr::from(octets)
    }

    pub fn destination(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.buf.as_ref()[24..40]);
        Ipv6Addr::from(octets)
    }

    /// Fixed header plus extension headers.
    pub fn header_len(&self) -> usize {
        header_chain(self.buf.as_ref())
            .map(|(len, _)| len)
            .unwrap_or(FIXED_HEADER_LEN)
    }

    /// Protocol number after the extension headers.
    pub fn upper_protocol(&self) -> u8 {
        header_chain(self.buf.as_ref())
            .map(|(_, proto)| proto)
            .unwrap_or_else(|_| self.next_header())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed(next: u8) -> Vec<u8> {
        let mut h = vec![0u8; FIXED_HEADER_LEN];
        h[0] = 0x60;
        h[6] = next;
        h[7] = 255;
        h[8] = 0xfe;
        h[9] = 0x80;
        h[23] = 1;
        h[24] = 0xfe;
        h[25] = 0x80;
        h[39] = 2;
        h
    }

    #[test]
    fn test_fixed_header_fields() {
        let h = fixed(6);
        let ip = Ipv6::new_checked(&h[..]).unwrap();
        assert_eq!(ip.version(), 6);
        assert_eq!(ip.hop_limit(), 255);
        assert_eq!(ip.header_len(), 40);
        assert_eq!(ip.upper_protocol(), 6);
        assert_eq!(ip.source(), "fe80::1".parse::<Ipv6Addr>().unwrap());
        assert_eq!(ip.destination(), "fe80::2".parse::<Ipv6Addr>().unwrap());
    }

    #[test]
    fn test_extension_headers_are_included_in_span() {
        let mut h = fixed(NEXT_HOP_BY_HOP);
        // Hop-by-hop: next = fragment, hdr ext len 0 -> 8 bytes.
        h.extend_from_slice(&[NEXT_FRAGMENT, 0, 0, 0, 0, 0, 0, 0]);
        // Fragment: next = UDP, always 8 bytes.
        h.extend_from_slice(&[17, 0, 0, 0, 0, 0, 0, 0]);
        let (len, upper) = header_chain(&h).unwrap();
        assert_eq!(len, 56);
        assert_eq!(upper, 17);
    }

    #[test]
    fn test_truncated_extension_header_is_rejected() {
        let mut h = fixed(NEXT_DEST_OPTS);
        h.extend_from_slice(&[6, 1, 0, 0]); // claims 16 bytes
        assert!(matches!(
            header_chain(&h),
            Err(DecodeError::Truncated { needed: 56, .. })
        ));
    }

    #[test]
    fn test_short_fixed_header_is_rejected() {
        assert!(Ipv6::new_checked(&[0x60u8; 39][..]).is_err());
    }
}
