//! Per-adapter capture/dispatch loop.
//!
//! `AdapterSession::start` opens the adapter, starts the modules and the
//! block log on the caller's thread, so an open failure is reported
//! synchronously and leaves nothing behind. The loop then runs on a
//! dedicated thread:
//!
//! 1. wait on the readiness signal (bounded by the wait timeout)
//! 2. reset the signal, then drain every pending frame
//! 3. per frame: meter, decode, run the pipeline, then block-log or forward
//!
//! Stopping is cooperative: the shutdown flag is checked at the top of each
//! wait and between frames. Teardown runs on the capture thread after the
//! loop exits and always releases every resource, collecting failures.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::capture::block_log::BlockLog;
use crate::capture::{AdapterChannel, AdapterInfo, AdapterMode, CaptureDriver, ManualResetEvent};
use crate::config::FirewallOptions;
use crate::core::bandwidth::BandwidthMeter;
use crate::core::frame::{Direction, FrameBuffer};
use crate::core::module::{lock_module, EventLog, SafeModule};
use crate::core::pipeline::ModulePipeline;
use crate::error::{DriverError, FirewallError};
use crate::packet::ProtocolView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Starting,
            2 => SessionState::Running,
            3 => SessionState::Stopping,
            4 => SessionState::Stopped,
            _ => SessionState::Idle,
        }
    }
}

/// A resource that failed to release during teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseFailure {
    pub resource: String,
    pub message: String,
}

/// Outcome of stopping a session. Teardown continues past failures, so
/// there can be several.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub failures: Vec<ReleaseFailure>,
}

impl StopReport {
    fn push(&mut self, resource: impl Into<String>, message: impl std::fmt::Display) {
        let failure = ReleaseFailure {
            resource: resource.into(),
            message: message.to_string(),
        };
        tracing::warn!("Failed to release {}: {}", failure.resource, failure.message);
        self.failures.push(failure);
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn first_failure(&self) -> Option<&ReleaseFailure> {
        self.failures.first()
    }

    /// The first failure as an error for `adapter`.
    pub fn into_result(self, adapter: &str) -> Result<(), FirewallError> {
        match self.failures.into_iter().next() {
            None => Ok(()),
            Some(f) => Err(FirewallError::ResourceRelease {
                adapter: adapter.to_string(),
                resource: f.resource,
                message: f.message,
            }),
        }
    }
}

/// Read-only view of a session for the display side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub name: String,
    pub enabled: bool,
    pub state: SessionState,
    pub inbound_bytes: u64,
    pub outbound_bytes: u64,
}

/// Settings a session needs from the options file.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub block_log_dir: PathBuf,
    pub wait_timeout: Duration,
}

impl From<&FirewallOptions> for SessionOptions {
    fn from(options: &FirewallOptions) -> Self {
        Self {
            block_log_dir: options.block_log_dir.clone(),
            wait_timeout: options.signal_wait_timeout(),
        }
    }
}

/// One adapter bound to its pipeline, counters and capture thread.
/// Dropping the session requests shutdown; the thread tears down on its own.
pub struct AdapterSession {
    adapter: AdapterInfo,
    state: Arc<AtomicU8>,
    shutdown: Arc<AtomicBool>,
    enabled: Arc<AtomicBool>,
    meter: Arc<BandwidthMeter>,
    pipeline: ModulePipeline,
    block_log_path: PathBuf,
    thread: Option<JoinHandle<StopReport>>,
}

impl AdapterSession {
    /// Open `adapter` and start filtering it with `modules`, in order.
    ///
    /// A module whose `start()` fails is logged and left out of the
    /// pipeline for this session; the adapter is still filtered by the rest.
    pub fn start(
        driver: &dyn CaptureDriver,
        adapter: AdapterInfo,
        modules: Vec<SafeModule>,
        options: &SessionOptions,
        log: Arc<dyn EventLog>,
    ) -> Result<Self, FirewallError> {
        let name = adapter.name.clone();
        let state = Arc::new(AtomicU8::new(SessionState::Starting as u8));

        let mut channel = driver
            .open(&adapter)
            .map_err(|source| FirewallError::DriverOpen {
                adapter: name.clone(),
                source,
            })?;

        let signal = match prepare_channel(channel.as_mut()) {
            Ok(signal) => signal,
            Err(source) => {
                if let Err(e) = channel.close() {
                    tracing::warn!("Failed to close {name} after setup error: {e}");
                }
                return Err(FirewallError::Driver {
                    adapter: name,
                    source,
                });
            }
        };

        let pipeline = start_modules(&name, modules);

        let block_log = match BlockLog::create(&options.block_log_dir, &name, SystemTime::now()) {
            Ok(log) => log,
            Err(e) => {
                tracing::error!("Failed to open block log for {name}: {e}");
                release_all(&pipeline, &signal, None, channel.as_mut());
                return Err(FirewallError::Io(e));
            }
        };
        let block_log_path = block_log.path().to_path_buf();

        let shutdown = Arc::new(AtomicBool::new(false));
        let enabled = Arc::new(AtomicBool::new(true));
        let meter = Arc::new(BandwidthMeter::new());

        let worker = CaptureWorker {
            adapter: name.clone(),
            channel,
            signal,
            pipeline: pipeline.clone(),
            block_log: Some(block_log),
            meter: Arc::clone(&meter),
            enabled: Arc::clone(&enabled),
            shutdown: Arc::clone(&shutdown),
            state: Arc::clone(&state),
            log,
            wait_timeout: options.wait_timeout,
        };

        let thread = match launch(worker, |job| {
            std::thread::Builder::new()
                .name(format!("capture-{name}"))
                .spawn(job)
        }) {
            Ok(thread) => thread,
            Err(e) => {
                tracing::error!("Failed to spawn capture thread for {name}: {e}");
                state.store(SessionState::Idle as u8, Ordering::Release);
                return Err(FirewallError::Io(e));
            }
        };
        // The loop only leaves Running once `stop` sets the shutdown flag.
        state.store(SessionState::Running as u8, Ordering::Release);

        tracing::info!(
            "Filtering started on {name} with modules [{}]",
            pipeline.module_names().join(", ")
        );

        Ok(Self {
            adapter,
            state,
            shutdown,
            enabled,
            meter,
            pipeline,
            block_log_path,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.adapter.name
    }

    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// When disabled, frames skip the pipeline and are forwarded as-is.
    /// Bandwidth is still counted.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn meter(&self) -> &Arc<BandwidthMeter> {
        &self.meter
    }

    pub fn pipeline(&self) -> &ModulePipeline {
        &self.pipeline
    }

    pub fn block_log_path(&self) -> &Path {
        &self.block_log_path
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let totals = self.meter.snapshot();
        SessionSnapshot {
            name: self.adapter.name.clone(),
            enabled: self.is_enabled(),
            state: self.state(),
            inbound_bytes: totals.inbound_bytes,
            outbound_bytes: totals.outbound_bytes,
        }
    }

    /// Request shutdown and wait for teardown. Latency is bounded by one
    /// signal wait timeout plus the frame being processed.
    pub fn stop(&mut self) -> StopReport {
        self.shutdown.store(true, Ordering::Release);
        let Some(thread) = self.thread.take() else {
            return StopReport::default();
        };
        match thread.join() {
            Ok(report) => {
                tracing::info!("Filtering stopped on {}", self.adapter.name);
                report
            }
            Err(_) => {
                self.state
                    .store(SessionState::Stopped as u8, Ordering::Release);
                let mut report = StopReport::default();
                report.push("capture thread", "panicked during teardown");
                report
            }
        }
    }
}

impl Drop for AdapterSession {
    fn drop(&mut self) {
        if self.thread.is_some() {
            tracing::warn!(
                "AdapterSession for {} dropped while running; requesting shutdown",
                self.adapter.name
            );
            self.shutdown.store(true, Ordering::Release);
        }
    }
}

fn prepare_channel(channel: &mut dyn AdapterChannel) -> Result<Arc<ManualResetEvent>, DriverError> {
    channel.set_mode(AdapterMode::TUNNEL)?;
    channel.register_readiness_signal()
}

fn start_modules(adapter: &str, modules: Vec<SafeModule>) -> ModulePipeline {
    let mut pipeline = ModulePipeline::new();
    for module in modules {
        let result = {
            let mut guard = lock_module(&module);
            guard.start().map_err(|e| (guard.name().to_string(), e))
        };
        match result {
            Ok(()) => pipeline.push(module),
            Err((name, e)) => {
                tracing::warn!("Module {name} failed to start on {adapter}, skipping it: {e:#}");
            }
        }
    }
    pipeline
}

fn stop_modules(pipeline: &ModulePipeline, report: &mut StopReport) {
    for module in pipeline.modules() {
        let mut guard = lock_module(module);
        if let Err(e) = guard.stop() {
            let resource = format!("module {}", guard.name());
            report.push(resource, format!("{e:#}"));
        }
    }
}

/// Release everything a session holds: modules, readiness signal, block log,
/// then the driver handle. A failure is recorded and the rest still run.
fn release_all(
    pipeline: &ModulePipeline,
    signal: &ManualResetEvent,
    block_log: Option<BlockLog>,
    channel: &mut dyn AdapterChannel,
) -> StopReport {
    let mut report = StopReport::default();
    stop_modules(pipeline, &mut report);
    if let Err(e) = signal.release() {
        report.push("readiness signal", e);
    }
    if let Some(block_log) = block_log {
        if let Err(e) = block_log.close() {
            report.push("block log", e);
        }
    }
    if let Err(e) = channel.close() {
        report.push("driver handle", e);
    }
    report
}

type CaptureJob = Box<dyn FnOnce() -> StopReport + Send>;

/// Hand `worker` to a thread made by `spawn`. When no thread can be made the
/// worker is torn down here, so nothing it holds outlives the failure.
fn launch<S>(worker: CaptureWorker, spawn: S) -> std::io::Result<JoinHandle<StopReport>>
where
    S: FnOnce(CaptureJob) -> std::io::Result<JoinHandle<StopReport>>,
{
    let slot = Arc::new(Mutex::new(Some(worker)));
    let handed = Arc::clone(&slot);
    let job: CaptureJob = Box::new(move || match take_worker(&handed) {
        Some(worker) => worker.run(),
        None => StopReport::default(),
    });
    spawn(job).map_err(|e| {
        if let Some(worker) = take_worker(&slot) {
            let adapter = worker.adapter.clone();
            let report = worker.teardown();
            if !report.is_clean() {
                tracing::warn!(
                    "{} resource(s) on {adapter} failed to release after spawn error",
                    report.failures.len()
                );
            }
        }
        e
    })
}

fn take_worker(slot: &Mutex<Option<CaptureWorker>>) -> Option<CaptureWorker> {
    slot.lock().unwrap_or_else(|p| p.into_inner()).take()
}

/// Everything the capture thread owns.
struct CaptureWorker {
    adapter: String,
    channel: Box<dyn AdapterChannel>,
    signal: Arc<ManualResetEvent>,
    pipeline: ModulePipeline,
    block_log: Option<BlockLog>,
    meter: Arc<BandwidthMeter>,
    enabled: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    state: Arc<AtomicU8>,
    log: Arc<dyn EventLog>,
    wait_timeout: Duration,
}

impl CaptureWorker {
    fn run(mut self) -> StopReport {
        tracing::debug!("Capture loop running on {}", self.adapter);
        while !self.shutdown.load(Ordering::Acquire) {
            if !self.signal.wait(self.wait_timeout) {
                continue;
            }
            // Reset before draining so a frame that arrives mid-drain sets
            // the signal again instead of being missed.
            self.signal.reset();
            self.drain();
        }
        self.teardown()
    }

    fn drain(&mut self) {
        while !self.shutdown.load(Ordering::Acquire) {
            match self.channel.read_frame() {
                Ok(Some(frame)) => self.process(frame),
                Ok(None) => break,
                Err(e) if e.is_transient() => break,
                Err(e) => {
                    tracing::warn!("Read failed on {}: {e}", self.adapter);
                    break;
                }
            }
        }
    }

    fn process(&mut self, mut frame: FrameBuffer) {
        self.meter.record(frame.direction(), frame.len());

        if !self.enabled.load(Ordering::Relaxed) {
            self.forward(&frame);
            return;
        }

        let decision = {
            let mut view = ProtocolView::decode(&mut frame);
            self.pipeline.run(&mut view, self.log.as_ref())
        };

        for bytes in &decision.send_out {
            match FrameBuffer::from_slice(bytes, Direction::Outbound) {
                Some(extra) => {
                    if let Err(e) = self.channel.send_to_network(&extra) {
                        tracing::warn!("Send-out failed on {}: {e}", self.adapter);
                    }
                }
                None => tracing::warn!(
                    "Send-out frame of {} bytes exceeds frame capacity on {}",
                    bytes.len(),
                    self.adapter
                ),
            }
        }

        if decision.drop {
            tracing::debug!(
                "Dropped {:?} frame of {} bytes on {} ({})",
                frame.direction(),
                frame.len(),
                self.adapter,
                decision.dropped_by.as_deref().unwrap_or("unknown")
            );
            if let Some(block_log) = self.block_log.as_mut() {
                if let Err(e) = block_log.append(&frame) {
                    tracing::warn!("Block log write failed on {}: {e}", self.adapter);
                }
            }
            return;
        }

        // Edits were applied in place, so forwarding commits them.
        self.forward(&frame);
    }

    fn forward(&mut self, frame: &FrameBuffer) {
        let result = match frame.direction() {
            Direction::Outbound => self.channel.send_to_network(frame),
            Direction::Inbound => self.channel.send_to_local_stack(frame),
        };
        if let Err(e) = result {
            tracing::warn!("Forward failed on {}: {e}", self.adapter);
        }
    }

    fn teardown(mut self) -> StopReport {
        self.state
            .store(SessionState::Stopping as u8, Ordering::Release);
        let report = release_all(
            &self.pipeline,
            &self.signal,
            self.block_log.take(),
            self.channel.as_mut(),
        );
        self.state
            .store(SessionState::Stopped as u8, Ordering::Release);
        report
    }
}
