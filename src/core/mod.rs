//! Core types shared by the decoder, the module pipeline and the capture loop.
//!
//! - `frame`: the captured frame buffer and its direction
//! - `verdict`: per-module action bitset and verdict value
//! - `module`: the module contract and event log sink
//! - `pipeline`: ordered verdict combination
//! - `bandwidth`: per-adapter byte accounting
//! - `quad`: direction-agnostic connection key

pub mod bandwidth;
pub mod frame;
pub mod module;
pub mod pipeline;
pub mod quad;
pub mod verdict;

pub use bandwidth::{format_bytes, BandwidthMeter, BandwidthRate, BandwidthSnapshot};
pub use frame::{Direction, FrameBuffer};
pub use module::{
    lock_module, safe_module, EventLog, FirewallModule, MemoryEventLog, SafeModule,
    TracingEventLog,
};
pub use pipeline::{Decision, ModulePipeline};
pub use quad::Quad;
pub use verdict::{Action, Verdict};
