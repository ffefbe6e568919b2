//! In-memory capture driver for driving sessions end to end in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::capture::{AdapterChannel, AdapterInfo, AdapterMode, CaptureDriver, ManualResetEvent};
use crate::core::frame::FrameBuffer;
use crate::error::DriverError;

/// What happened on one scripted adapter.
#[derive(Debug, Default)]
pub struct ScriptedAdapter {
    pub pending: VecDeque<FrameBuffer>,
    pub to_network: Vec<Vec<u8>>,
    pub to_local: Vec<Vec<u8>>,
    pub mode: Option<AdapterMode>,
    pub signal: Option<Arc<ManualResetEvent>>,
    pub closed: bool,
    pub opened: u32,
    pub fail_open: bool,
    pub fail_close: bool,
    /// Return `NotReady` once before the next frame.
    pub not_ready_once: bool,
}

type Shared = Arc<Mutex<ScriptedAdapter>>;

fn lock(shared: &Shared) -> MutexGuard<'_, ScriptedAdapter> {
    shared.lock().unwrap_or_else(|p| p.into_inner())
}

/// Adapters are added and removed at will; frames injected into an adapter
/// set its readiness signal like a real driver would.
#[derive(Default)]
pub struct ScriptedDriver {
    adapters: Mutex<Vec<AdapterInfo>>,
    state: Mutex<HashMap<String, Shared>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adapters(names: &[&str]) -> Self {
        let driver = Self::new();
        for name in names {
            driver.add_adapter(name);
        }
        driver
    }

    pub fn add_adapter(&self, name: &str) {
        self.adapters.lock().unwrap().push(AdapterInfo {
            handle: format!("scripted:{name}"),
            name: name.to_string(),
            description: format!("scripted adapter {name}"),
        });
        self.adapter(name);
    }

    pub fn remove_adapter(&self, name: &str) {
        self.adapters.lock().unwrap().retain(|a| a.name != name);
    }

    pub fn info(&self, name: &str) -> AdapterInfo {
        self.adapters
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .unwrap()
    }

    /// Shared state for `name`, created on first use.
    pub fn adapter(&self, name: &str) -> Shared {
        Arc::clone(
            self.state
                .lock()
                .unwrap()
                .entry(name.to_string())
                .or_default(),
        )
    }

    pub fn inject(&self, name: &str, frame: FrameBuffer) {
        let shared = self.adapter(name);
        let mut s = lock(&shared);
        s.pending.push_back(frame);
        if let Some(signal) = &s.signal {
            signal.set();
        }
    }

    pub fn with_state<R>(&self, name: &str, f: impl FnOnce(&mut ScriptedAdapter) -> R) -> R {
        let shared = self.adapter(name);
        let mut s = lock(&shared);
        f(&mut s)
    }

    /// Poll until `cond` holds or five seconds pass.
    pub fn wait_for(&self, name: &str, cond: impl Fn(&ScriptedAdapter) -> bool) -> bool {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if self.with_state(name, |s| cond(s)) {
                return true;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        false
    }
}

impl CaptureDriver for ScriptedDriver {
    fn enumerate_adapters(&self) -> Result<Vec<AdapterInfo>, DriverError> {
        Ok(self.adapters.lock().unwrap().clone())
    }

    fn open(&self, adapter: &AdapterInfo) -> Result<Box<dyn AdapterChannel>, DriverError> {
        let shared = self.adapter(&adapter.name);
        {
            let mut s = lock(&shared);
            if s.fail_open {
                return Err(DriverError::OpenFailure(format!(
                    "{} refused to open",
                    adapter.name
                )));
            }
            s.opened += 1;
            s.closed = false;
        }
        Ok(Box::new(ScriptedChannel { shared }))
    }
}

struct ScriptedChannel {
    shared: Shared,
}

impl AdapterChannel for ScriptedChannel {
    fn set_mode(&mut self, mode: AdapterMode) -> Result<(), DriverError> {
        lock(&self.shared).mode = Some(mode);
        Ok(())
    }

    fn register_readiness_signal(&mut self) -> Result<Arc<ManualResetEvent>, DriverError> {
        let signal = Arc::new(ManualResetEvent::new());
        let mut s = lock(&self.shared);
        if !s.pending.is_empty() {
            signal.set();
        }
        s.signal = Some(Arc::clone(&signal));
        Ok(signal)
    }

    fn read_frame(&mut self) -> Result<Option<FrameBuffer>, DriverError> {
        let mut s = lock(&self.shared);
        if s.closed {
            return Err(DriverError::Closed);
        }
        if s.not_ready_once && !s.pending.is_empty() {
            s.not_ready_once = false;
            // Frames are still queued, so the driver signals again.
            if let Some(signal) = &s.signal {
                signal.set();
            }
            return Err(DriverError::NotReady);
        }
        Ok(s.pending.pop_front())
    }

    fn send_to_network(&mut self, frame: &FrameBuffer) -> Result<(), DriverError> {
        lock(&self.shared).to_network.push(frame.as_slice().to_vec());
        Ok(())
    }

    fn send_to_local_stack(&mut self, frame: &FrameBuffer) -> Result<(), DriverError> {
        lock(&self.shared).to_local.push(frame.as_slice().to_vec());
        Ok(())
    }

    fn close(&mut self) -> Result<(), DriverError> {
        let mut s = lock(&self.shared);
        s.closed = true;
        if s.fail_close {
            return Err(DriverError::Unsupported("scripted close failure".into()));
        }
        Ok(())
    }
}
