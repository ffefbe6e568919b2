//! One captured link-layer frame.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::config::FRAME_CAPACITY;

/// Which way the frame was travelling when the driver captured it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Received from the network, headed for the local stack.
    Inbound,
    /// Sent by the local stack, headed for the network.
    Outbound,
}

/// A fixed-capacity frame buffer owned by one capture cycle.
///
/// `len` never exceeds [`FRAME_CAPACITY`]. Bytes past `len` are always zero
/// and are never exposed.
#[derive(Clone)]
pub struct FrameBuffer {
    bytes: [u8; FRAME_CAPACITY],
    len: u32,
    direction: Direction,
    captured_at: SystemTime,
}

impl FrameBuffer {
    /// Copy `data` into a new buffer stamped with the current time.
    /// Returns `None` when `data` does not fit.
    pub fn from_slice(data: &[u8], direction: Direction) -> Option<Self> {
        Self::with_timestamp(data, direction, SystemTime::now())
    }

    /// Same as [`FrameBuffer::from_slice`] with an explicit capture time.
    pub fn with_timestamp(
        data: &[u8],
        direction: Direction,
        captured_at: SystemTime,
    ) -> Option<Self> {
        if data.len() > FRAME_CAPACITY {
            return None;
        }
        let mut bytes = [0u8; FRAME_CAPACITY];
        bytes[..data.len()].copy_from_slice(data);
        Some(Self {
            bytes,
            len: data.len() as u32,
            direction,
            captured_at,
        })
    }

    /// Captured length in bytes.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// The captured bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// The captured bytes, writable in place. The length cannot change.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len as usize]
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("len", &self.len)
            .field("direction", &self.direction)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}
