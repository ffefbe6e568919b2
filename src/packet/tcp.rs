//! TCP header view.

use crate::error::DecodeError;
use crate::packet::{read_u16, ProtocolTag};

pub const MIN_HEADER_LEN: usize = 20;

pub const FLAG_FIN: u8 = 0x01;
pub const FLAG_SYN: u8 = 0x02;
pub const FLAG_RST: u8 = 0x04;
pub const FLAG_PSH: u8 = 0x08;
pub const FLAG_ACK: u8 = 0x10;

/// Header length in bytes from the data-offset nibble (byte 12).
pub fn header_len(offset_byte: u8) -> usize {
    ((offset_byte >> 4) as usize) * 4
}

#[derive(Debug)]
pub struct Tcp<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> Tcp<B> {
    /// Requires the full header (options included) to be present.
    pub fn new_checked(buf: B) -> Result<Self, DecodeError> {
        let b = buf.as_ref();
        let available = b.len();
        if available < MIN_HEADER_LEN {
            return Err(DecodeError::Truncated {
                protocol: ProtocolTag::Tcp,
                needed: MIN_HEADER_LEN,
                available,
            });
        }
        let needed = header_len(b[12]);
        if needed < MIN_HEADER_LEN || available < needed {
            return Err(DecodeError::Truncated {
                protocol: ProtocolTag::Tcp,
                needed: needed.max(MIN_HEADER_LEN),
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

    pub fn sequence(&self) -> u32 {
        let b = self.buf.as_ref();
        u32::from_be_bytes([b[4], b[5], b[6], b[7]])
    }

    pub fn acknowledgement(&self) -> u32 {
        let b = self.buf.as_ref();
        u32::from_be_bytes([b[8], b[9], b[10], b[11]])
    }

    pub fn header_len(&self) -> usize {
        header_len(self.buf.as_ref()[12])
    }

    pub fn flags(&self) -> u8 {
        self.buf.as_ref()[13]
    }

    pub fn fin(&self) -> bool {
        self.flags() & FLAG_FIN != 0
    }

    pub fn syn(&self) -> bool {
        self.flags() & FLAG_SYN != 0
    }

    pub fn rst(&self) -> bool {
        self.flags() & FLAG_RST != 0
    }

    pub fn psh(&self) -> bool {
        self.flags() & FLAG_PSH != 0
    }

    pub fn ack(&self) -> bool {
        self.flags() & FLAG_ACK != 0
    }

    pub fn window(&self) -> u16 {
        read_u16(self.buf.as_ref(), 14)
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Tcp<B> {
    pub fn set_flags(&mut self, flags: u8) {
        self.buf.as_mut()[13] = flags;
    }
}
