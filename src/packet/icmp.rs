//! ICMP header view (first 8 bytes).

use crate::error::DecodeError;
use crate::packet::{read_u16, ProtocolTag};

pub const HEADER_LEN: usize = 8;

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_DEST_UNREACHABLE: u8 = 3;
pub const TYPE_REDIRECT: u8 = 5;
pub const TYPE_ECHO_REQUEST: u8 = 8;
pub const TYPE_TIME_EXCEEDED: u8 = 11;

pub const TYPE_V6_ECHO_REQUEST: u8 = 128;
pub const TYPE_V6_REDIRECT: u8 = 137;

#[derive(Debug)]
pub struct Icmp<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> Icmp<B> {
    pub fn new_checked(buf: B) -> Result<Self, DecodeError> {
        let available = buf.as_ref().len();
        if available < HEADER_LEN {
            return Err(DecodeError::Truncated {
                protocol: ProtocolTag::Icmp,
                needed: HEADER_LEN,
                available,
            });
        }
        Ok(Self { buf })
    }

    pub fn msg_type(&self) -> u8 {
        self.buf.as_ref()[0]
    }

    pub fn code(&self) -> u8 {
        self.buf.as_ref()[1]
    }

    pub fn checksum(&self) -> u16 {
        read_u16(self.buf.as_ref(), 2)
    }
}
