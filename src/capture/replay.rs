//! Capture driver that replays pcap files through the firewall.
//!
//! Each file is one adapter named after the file stem. Every record is
//! presented as an inbound frame; frames the firewall lets through (and any
//! send-out frames) are written to `passed-<adapter>.pcap` in the output
//! directory, so a replay leaves a before/after pair next to the block log.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};

use crate::capture::{AdapterChannel, AdapterInfo, AdapterMode, CaptureDriver, ManualResetEvent};
use crate::config::PCAP_SNAPLEN;
use crate::core::frame::{Direction, FrameBuffer};
use crate::error::{DriverError, FirewallError};
use crate::pcap::{read_ethernet_records, PcapWriter};

pub struct ReplayDriver {
    adapters: Vec<AdapterInfo>,
    output_dir: PathBuf,
    /// Frames not yet read, per adapter.
    remaining: DashMap<String, Arc<AtomicUsize>>,
    /// Adapters whose capture could not be opened.
    failed: DashSet<String>,
}

impl ReplayDriver {
    pub fn new(captures: &[PathBuf], output_dir: impl Into<PathBuf>) -> Result<Self, FirewallError> {
        if captures.is_empty() {
            return Err(FirewallError::InvalidInput(
                "replay needs at least one capture file".into(),
            ));
        }
        let mut adapters: Vec<AdapterInfo> = Vec::with_capacity(captures.len());
        for path in captures {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .filter(|s| !s.is_empty())
                .unwrap_or("capture");
            let mut name = stem.to_string();
            let mut n = 1;
            while adapters.iter().any(|a| a.name == name) {
                n += 1;
                name = format!("{stem}-{n}");
            }
            adapters.push(AdapterInfo {
                handle: path.display().to_string(),
                name,
                description: format!("replay of {}", path.display()),
            });
        }
        Ok(Self {
            adapters,
            output_dir: output_dir.into(),
            remaining: DashMap::new(),
            failed: DashSet::new(),
        })
    }

    /// Drop the adapters `keep` rejects, so captures nobody will filter do
    /// not hold up [`ReplayDriver::is_drained`]. Returns how many remain.
    pub fn retain_adapters(&mut self, keep: impl Fn(&str) -> bool) -> usize {
        self.adapters.retain(|a| keep(&a.name));
        self.adapters.len()
    }

    /// Adapters whose capture was opened successfully.
    pub fn opened(&self) -> usize {
        self.remaining.len()
    }

    /// Frames still queued on `adapter`, once it has been opened.
    pub fn remaining(&self, adapter: &str) -> Option<usize> {
        self.remaining
            .get(adapter)
            .map(|r| r.load(Ordering::Acquire))
    }

    /// True once every adapter has either failed to open or handed out all
    /// of its frames.
    pub fn is_drained(&self) -> bool {
        self.adapters.iter().all(|a| {
            self.failed.contains(&a.name)
                || self
                    .remaining
                    .get(&a.name)
                    .is_some_and(|r| r.load(Ordering::Acquire) == 0)
        })
    }

    pub fn passed_path(&self, adapter: &str) -> PathBuf {
        self.output_dir.join(format!("passed-{adapter}.pcap"))
    }
}

impl CaptureDriver for ReplayDriver {
    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, DriverError> {
        Ok(self.adapters.clone())
    }

    fn open(&self, adapter: &AdapterInfo) -> Result<Box<dyn AdapterChannel>, DriverError> {
        let opened = self.open_capture(adapter);
        if opened.is_err() {
            self.failed.insert(adapter.name.clone());
        }
        opened
    }
}

impl ReplayDriver {
    fn open_capture(&self, adapter: &AdapterInfo) -> Result<Box<dyn AdapterChannel>, DriverError> {
        let records = read_ethernet_records(Path::new(&adapter.handle))
            .map_err(|e| DriverError::OpenFailure(format!("{}: {e}", adapter.handle)))?;

        let mut pending = VecDeque::with_capacity(records.len());
        for (index, record) in records.into_iter().enumerate() {
            match FrameBuffer::with_timestamp(&record.data, Direction::Inbound, record.captured_at) {
                Some(frame) => pending.push_back(frame),
                None => tracing::warn!(
                    "Skipping record {index} of {}: {} bytes exceeds frame capacity",
                    adapter.handle,
                    record.data.len()
                ),
            }
        }

        std::fs::create_dir_all(&self.output_dir)?;
        let file = File::create(self.passed_path(&adapter.name))?;
        let passed = PcapWriter::new(BufWriter::new(file), PCAP_SNAPLEN)?;

        let remaining = Arc::new(AtomicUsize::new(pending.len()));
        self.remaining
            .insert(adapter.name.clone(), Arc::clone(&remaining));
        tracing::info!(
            "Replaying {} frames from {} as {}",
            pending.len(),
            adapter.handle,
            adapter.name
        );

        Ok(Box::new(ReplayChannel {
            pending,
            remaining,
            passed: Some(passed),
        }))
    }
}

struct ReplayChannel {
    pending: VecDeque<FrameBuffer>,
    remaining: Arc<AtomicUsize>,
    passed: Option<PcapWriter<BufWriter<File>>>,
}

impl ReplayChannel {
    fn write(&mut self, frame: &FrameBuffer) -> Result<(), DriverError> {
        let passed = self.passed.as_mut().ok_or(DriverError::Closed)?;
        passed.write_record(frame.captured_at(), frame.as_slice())?;
        Ok(())
    }
}

impl AdapterChannel for ReplayChannel {
    fn set_mode(&mut self, mode: AdapterMode) -> Result<(), DriverError> {
        tracing::trace!("Replay channel mode set to {mode:?}");
        Ok(())
    }

    fn register_readiness_signal(&mut self) -> Result<Arc<ManualResetEvent>, DriverError> {
        let signal = Arc::new(ManualResetEvent::new());
        // The whole capture is pending from the start.
        if !self.pending.is_empty() {
            signal.set();
        }
        Ok(signal)
    }

    fn read_frame(&mut self) -> Result<Option<FrameBuffer>, DriverError> {
        if self.passed.is_none() {
            return Err(DriverError::Closed);
        }
        let frame = self.pending.pop_front();
        if frame.is_some() {
            self.remaining.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(frame)
    }

    fn send_to_network(&mut self, frame: &FrameBuffer) -> Result<(), DriverError> {
        self.write(frame)
    }

    fn send_to_local_stack(&mut self, frame: &FrameBuffer) -> Result<(), DriverError> {
        self.write(frame)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        let mut passed = self.passed.take().ok_or(DriverError::Closed)?;
        passed.flush()?;
        if !self.pending.is_empty() {
            tracing::debug!("Replay closed with {} frames unread", self.pending.len());
            self.pending.clear();
            self.remaining.store(0, Ordering::Release);
        }
        Ok(())
    }
}
