//! UDP header view.

use crate::error::DecodeError;
use crate::packet::{read_u16, ProtocolTag};

pub const HEADER_LEN: usize = 8;

pub const DNS_PORT: u16 = 53;

#[derive(Debug)]
pub struct Udp<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> Udp<B> {
    pub fn new_checked(buf: B) -> Result<Self, DecodeError> {
        let available = buf.as_ref().len();
        if available < HEADER_LEN {
            return Err(DecodeError::Truncated {
                protocol: ProtocolTag::Udp,
                needed: HEADER_LEN,
                available,
            });
        }
        Ok(Self { buf })
    }

    pub fn source_port(&self) -> u16 {
        read_u16(self.buf.as_ref(), 0)
    }

    pub fn destination_port(&self) -> u16 {
        read_u16(self.buf.as_ref(), 2)
    }

    pub fn length(&self) -> u16 {
        read_u16(self.buf.as_ref(), 4)
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buf.as_ref(), 6)
    }

    /// High byte of the length field is zero. Common for port-scan probes.
    pub fn is_empty(&self) -> bool {
        self.buf.as_ref()[4] == 0
    }

    pub fn is_dns(&self) -> bool {
        self.source_port() == DNS_PORT || self.destination_port() == DNS_PORT
    }
}
