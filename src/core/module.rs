//! The contract every policy module implements.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::verdict::Verdict;
use crate::packet::ProtocolView;

/// A policy module in an adapter's pipeline.
///
/// `classify` may rewrite the frame through the view (the frame length is
/// fixed). Errors and panics from `classify` are caught by the pipeline and
/// turned into an `ERROR | LOG` verdict.
pub trait FirewallModule: Send {
    /// Stable name used in logs and by the display surface.
    fn name(&self) -> &str;

    /// Prime the module before the first frame.
    fn start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release anything the module holds.
    fn stop(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn classify(&mut self, view: &mut ProtocolView<'_>) -> anyhow::Result<Verdict>;

    /// Opaque configuration surface for a display collaborator.
    fn config(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Shared handle to a module. The capture thread classifies through it while
/// the display side reads the name and configuration.
pub type SafeModule = Arc<Mutex<dyn FirewallModule>>;

/// Wrap a module for use in a pipeline.
pub fn safe_module<M: FirewallModule + 'static>(module: M) -> SafeModule {
    Arc::new(Mutex::new(module))
}

/// Lock a module, recovering from a poisoned lock. A panic inside `classify`
/// is already reported as a module failure.
pub fn lock_module(module: &SafeModule) -> MutexGuard<'_, dyn FirewallModule + 'static> {
    module.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Where module log messages go.
pub trait EventLog: Send + Sync {
    fn push(&self, module: &str, message: &str);
}

/// Emits module messages through `tracing` on the `firewall::module` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventLog;

impl EventLog for TracingEventLog {
    fn push(&self, module: &str, message: &str) {
        tracing::info!(target: "firewall::module", module, "{message}");
    }
}

/// Collects messages in order; used by tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    entries: Mutex<Vec<(String, String)>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(String, String)> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl EventLog for MemoryEventLog {
    fn push(&self, module: &str, message: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((module.to_string(), message.to_string()));
    }
}
