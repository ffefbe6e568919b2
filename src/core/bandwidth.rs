//! Per-adapter byte accounting.
//!
//! The capture thread is the only writer; the display side reads totals and
//! samples rates concurrently. Counters are plain atomics so a read never
//! observes a half-applied update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

use crate::core::frame::Direction;

/// Totals at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BandwidthSnapshot {
    pub inbound_bytes: u64,
    pub outbound_bytes: u64,
}

/// Bytes per second since the previous sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct BandwidthRate {
    pub inbound_bps: f64,
    pub outbound_bps: f64,
}

#[derive(Debug)]
struct SampleState {
    prev: BandwidthSnapshot,
    last_tick: Option<Instant>,
}

#[derive(Debug)]
pub struct BandwidthMeter {
    inbound: AtomicU64,
    outbound: AtomicU64,
    sample: Mutex<SampleState>,
}

impl Default for BandwidthMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl BandwidthMeter {
    pub fn new() -> Self {
        Self {
            inbound: AtomicU64::new(0),
            outbound: AtomicU64::new(0),
            sample: Mutex::new(SampleState {
                prev: BandwidthSnapshot::default(),
                last_tick: None,
            }),
        }
    }

    /// Add `len` bytes to the counter for `direction`.
    pub fn record(&self, direction: Direction, len: u32) {
        let counter = match direction {
            Direction::Inbound => &self.inbound,
            Direction::Outbound => &self.outbound,
        };
        counter.fetch_add(u64::from(len), Ordering::Relaxed);
    }

    pub fn inbound(&self) -> u64 {
        self.inbound.load(Ordering::Relaxed)
    }

    pub fn outbound(&self) -> u64 {
        self.outbound.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> BandwidthSnapshot {
        BandwidthSnapshot {
            inbound_bytes: self.inbound(),
            outbound_bytes: self.outbound(),
        }
    }

    /// Rate since the last call. The first call only primes the sampler and
    /// reports zero.
    pub fn sample(&self) -> BandwidthRate {
        self.sample_at(Instant::now())
    }

    fn sample_at(&self, now: Instant) -> BandwidthRate {
        let current = self.snapshot();
        let mut state = self
            .sample
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut rate = BandwidthRate::default();
        if let Some(last) = state.last_tick {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            if elapsed > 0.0 {
                rate.inbound_bps =
                    current.inbound_bytes.saturating_sub(state.prev.inbound_bytes) as f64 / elapsed;
                rate.outbound_bps = current
                    .outbound_bytes
                    .saturating_sub(state.prev.outbound_bytes) as f64
                    / elapsed;
            }
        }
        state.prev = current;
        state.last_tick = Some(now);
        rate
    }
}

/// Render a byte count compactly for display.
pub fn format_bytes(bytes: u64) -> String {
    let b = bytes as f64;
    if b < 1024.0 {
        format!("{bytes} B")
    } else if b < 1024.0 * 1024.0 {
        format!("{:.1} KB", b / 1024.0)
    } else if b < 1024.0 * 1024.0 * 1024.0 {
        format!("{:.2} MB", b / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", b / (1024.0 * 1024.0 * 1024.0))
    }
}
