//! Capture driver contract and the per-adapter capture loop.
//!
//! A driver enumerates adapters and opens a channel per adapter. The
//! session loop only sees the `AdapterChannel` trait, so backends are
//! interchangeable:
//! - Windows: WinDivert 2.x (`windivert_backend`)
//! - Any platform: pcap file replay (`replay`)

pub mod block_log;
pub mod replay;
pub mod session;
pub mod signal;

#[cfg(target_os = "windows")]
pub mod windivert_backend;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use bitflags::bitflags;
use serde::Serialize;

use crate::core::frame::FrameBuffer;
use crate::error::DriverError;

pub use block_log::BlockLog;
pub use session::{AdapterSession, ReleaseFailure, SessionState, StopReport};
pub use signal::ManualResetEvent;

bitflags! {
    /// How the driver treats frames on an adapter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AdapterMode: u32 {
        /// Divert frames sent by the local stack; the original is held.
        const SENT_TUNNEL = 1;
        /// Divert frames indicated to the local stack; the original is held.
        const RECV_TUNNEL = 2;
        /// Copy sent frames; the original goes ahead.
        const SENT_LISTEN = 4;
        /// Copy received frames; the original goes ahead.
        const RECV_LISTEN = 8;
        /// Both directions diverted. Filtering needs this.
        const TUNNEL = Self::SENT_TUNNEL.bits() | Self::RECV_TUNNEL.bits();
        const LISTEN = Self::SENT_LISTEN.bits() | Self::RECV_LISTEN.bits();
    }
}

/// One adapter as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct AdapterInfo {
    /// Driver-specific identifier used to open the adapter.
    pub handle: String,
    /// Name shown to users and used to key sessions.
    pub name: String,
    pub description: String,
}

/// Source of adapters. Shared between the registry and the refresher.
pub trait CaptureDriver: Send + Sync {
    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, DriverError>;

    /// Open a channel on `adapter`. Failure is fatal to that adapter only.
    fn open(&self, adapter: &AdapterInfo) -> Result<Box<dyn AdapterChannel>, DriverError>;
}

/// An open adapter, exclusively owned by one capture thread.
pub trait AdapterChannel: Send {
    fn set_mode(&mut self, mode: AdapterMode) -> Result<(), DriverError>;

    /// The event the driver sets whenever frames are pending.
    fn register_readiness_signal(&mut self) -> Result<Arc<ManualResetEvent>, DriverError>;

    /// Next pending frame. `Ok(None)` and `Err(DriverError::NotReady)` both
    /// mean nothing is pending right now.
    fn read_frame(&mut self) -> Result<Option<FrameBuffer>, DriverError>;

    fn send_to_network(&mut self, frame: &FrameBuffer) -> Result<(), DriverError>;

    fn send_to_local_stack(&mut self, frame: &FrameBuffer) -> Result<(), DriverError>;

    /// Restore the adapter's mode and release the handle.
    fn close(&mut self) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_mode_covers_both_directions() {
        assert!(AdapterMode::TUNNEL.contains(AdapterMode::SENT_TUNNEL));
        assert!(AdapterMode::TUNNEL.contains(AdapterMode::RECV_TUNNEL));
        assert!(!AdapterMode::TUNNEL.intersects(AdapterMode::LISTEN));
        assert_eq!(AdapterMode::TUNNEL.bits(), 3);
    }
}
