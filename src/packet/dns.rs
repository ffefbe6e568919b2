//! DNS header view over the UDP payload.
//!
//! The response flag is bit 0x80 of byte 0 and the question count is the
//! big-endian word at offset 2.

use crate::error::DecodeError;
use crate::packet::{read_u16, ProtocolTag};

pub const HEADER_LEN: usize = 12;

#[derive(Debug)]
pub struct Dns<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> Dns<B> {
    pub fn new_checked(buf: B) -> Result<Self, DecodeError> {
        let available = buf.as_ref().len();
        if available < HEADER_LEN {
            return Err(DecodeError::Truncated {
                protocol: ProtocolTag::Dns,
                needed: HEADER_LEN,
                available,
            });
        }
        Ok(Self { buf })
    }

    pub fn is_response(&self) -> bool {
        self.buf.as_ref()[0] & 0x80 == 0x80
    }

    pub fn question_count(&self) -> u16 {
        read_u16(self.buf.as_ref(), 2)
    }

    /// Length of the DNS message as captured.
    pub fn len(&self) -> usize {
        self.buf.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Dns<B> {
    pub fn set_response(&mut self, response: bool) {
        let b = self.buf.as_mut();
        if response {
            b[0] |= 0x80;
        } else {
            b[0] &= !0x80;
        }
    }

    pub fn set_question_count(&mut self, count: u16) {
        self.buf.as_mut()[2..4].copy_from_slice(&count.to_be_bytes());
    }
}
