//! Adapter registry: the set of known adapters and the sessions filtering them.
//!
//! The registry is the single owner of every `AdapterSession`. The periodic
//! refresher diffs the driver's adapter list against it; the CLI (or any
//! display collaborator) reads snapshots and toggles sessions through it.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use serde::Serialize;

use crate::capture::session::{SessionOptions, SessionSnapshot};
use crate::capture::{AdapterInfo, AdapterSession, CaptureDriver, StopReport};
use crate::config::FirewallOptions;
use crate::core::bandwidth::BandwidthRate;
use crate::core::module::{EventLog, SafeModule, TracingEventLog};
use crate::error::FirewallError;
use crate::modules::default_modules;

/// Builds a fresh module set for each new session.
pub type ModuleFactory = Arc<dyn Fn() -> Vec<SafeModule> + Send + Sync>;

/// Adapters that appeared or disappeared since the previous refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdapterDiff {
    pub added: Vec<AdapterInfo>,
    pub removed: Vec<AdapterInfo>,
}

impl AdapterDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

pub struct AdapterRegistry {
    driver: Arc<dyn CaptureDriver>,
    adapters: DashMap<String, AdapterInfo>,
    sessions: DashMap<String, AdapterSession>,
    /// Adapters whose session is being built; no map lock is held meanwhile.
    starting: DashSet<String>,
    options: SessionOptions,
    log: Arc<dyn EventLog>,
    factory: ModuleFactory,
}

impl AdapterRegistry {
    /// Registry using the default module set configured by `options`.
    pub fn new(driver: Arc<dyn CaptureDriver>, options: &FirewallOptions) -> Self {
        let modules = options.modules.clone();
        Self {
            driver,
            adapters: DashMap::new(),
            sessions: DashMap::new(),
            starting: DashSet::new(),
            options: SessionOptions::from(options),
            log: Arc::new(TracingEventLog),
            factory: Arc::new(move || default_modules(&modules)),
        }
    }

    pub fn with_module_factory(mut self, factory: ModuleFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_event_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.log = log;
        self
    }

    /// Re-enumerate adapters. Sessions on adapters that disappeared are
    /// stopped; release failures are logged, not returned.
    pub fn refresh(&self) -> Result<AdapterDiff, FirewallError> {
        let current = self
            .driver
            .enumerate_adapters()
            .map_err(|source| FirewallError::Driver {
                adapter: "*".to_string(),
                source,
            })?;

        let mut diff = AdapterDiff::default();
        for info in &current {
            if !self.adapters.contains_key(&info.name) {
                self.adapters.insert(info.name.clone(), info.clone());
                diff.added.push(info.clone());
            }
        }

        let gone: Vec<String> = self
            .adapters
            .iter()
            .filter(|entry| !current.iter().any(|info| &info.name == entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for name in gone {
            if let Some((_, info)) = self.adapters.remove(&name) {
                diff.removed.push(info);
            }
            if let Some((_, mut session)) = self.sessions.remove(&name) {
                tracing::info!("Adapter {name} disappeared, stopping its session");
                let report = session.stop();
                if let Some(failure) = report.first_failure() {
                    tracing::warn!(
                        "Session on removed adapter {name} released with errors: {}: {}",
                        failure.resource,
                        failure.message
                    );
                }
            }
        }

        if !diff.is_empty() {
            tracing::info!(
                "Adapters refreshed: {} added, {} removed",
                diff.added.len(),
                diff.removed.len()
            );
        }
        Ok(diff)
    }

    /// Known adapters, sorted by name.
    pub fn adapters(&self) -> Vec<AdapterInfo> {
        let mut list: Vec<AdapterInfo> = self.adapters.iter().map(|e| e.value().clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn is_filtering(&self, name: &str) -> bool {
        self.sessions.contains_key(name)
    }

    pub fn start_filtering(&self, name: &str) -> Result<(), FirewallError> {
        let info = self
            .adapters
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| FirewallError::UnknownAdapter(name.to_string()))?;

        let already = || FirewallError::InvalidInput(format!("adapter {name} is already being filtered"));
        if self.sessions.contains_key(name) || !self.starting.insert(name.to_string()) {
            return Err(already());
        }

        // Opening the driver, starting modules and spawning the thread all
        // happen without holding a shard lock.
        let started = AdapterSession::start(
            self.driver.as_ref(),
            info,
            (self.factory)(),
            &self.options,
            Arc::clone(&self.log),
        );
        let session = match started {
            Ok(session) => session,
            Err(e) => {
                self.starting.remove(name);
                return Err(e);
            }
        };

        let lost_race = match self.sessions.entry(name.to_string()) {
            Entry::Occupied(_) => Some(session),
            Entry::Vacant(slot) => {
                slot.insert(session);
                None
            }
        };
        self.starting.remove(name);
        match lost_race {
            None => Ok(()),
            Some(mut session) => {
                let report = session.stop();
                if !report.is_clean() {
                    tracing::warn!("Duplicate session on {name} released with errors");
                }
                Err(already())
            }
        }
    }

    /// Stop filtering `name`. Every resource is released even when one fails;
    /// the first failure is returned.
    pub fn stop_filtering(&self, name: &str) -> Result<(), FirewallError> {
        let (_, mut session) = self
            .sessions
            .remove(name)
            .ok_or_else(|| FirewallError::UnknownAdapter(name.to_string()))?;
        session.stop().into_result(name)
    }

    /// One snapshot per running session, sorted by adapter name.
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut snaps: Vec<SessionSnapshot> = self.sessions.iter().map(|s| s.snapshot()).collect();
        snaps.sort_by(|a, b| a.name.cmp(&b.name));
        snaps
    }

    /// Rates since the previous call, per running session.
    pub fn sample_rates(&self) -> Vec<(String, BandwidthRate)> {
        let mut rates: Vec<(String, BandwidthRate)> = self
            .sessions
            .iter()
            .map(|s| (s.key().clone(), s.meter().sample()))
            .collect();
        rates.sort_by(|a, b| a.0.cmp(&b.0));
        rates
    }

    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), FirewallError> {
        let session = self
            .sessions
            .get(name)
            .ok_or_else(|| FirewallError::UnknownAdapter(name.to_string()))?;
        session.set_enabled(enabled);
        tracing::info!(
            "Filtering on {name} {}",
            if enabled { "enabled" } else { "bypassed" }
        );
        Ok(())
    }

    pub fn module_names(&self, name: &str) -> Result<Vec<String>, FirewallError> {
        let session = self
            .sessions
            .get(name)
            .ok_or_else(|| FirewallError::UnknownAdapter(name.to_string()))?;
        Ok(session.pipeline().module_names())
    }

    /// Configuration surface of one module on one adapter.
    pub fn module_config(
        &self,
        name: &str,
        module: &str,
    ) -> Result<Option<serde_json::Value>, FirewallError> {
        let session = self
            .sessions
            .get(name)
            .ok_or_else(|| FirewallError::UnknownAdapter(name.to_string()))?;
        session
            .pipeline()
            .configs()
            .into_iter()
            .find(|(module_name, _)| module_name == module)
            .map(|(_, config)| config)
            .ok_or_else(|| {
                FirewallError::InvalidInput(format!("no module {module} on adapter {name}"))
            })
    }

    /// Stop every session. Returns each adapter's report.
    pub fn shutdown_all(&self) -> Vec<(String, StopReport)> {
        let names: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            if let Some((_, mut session)) = self.sessions.remove(&name) {
                reports.push((name, session.stop()));
            }
        }
        if !reports.is_empty() {
            tracing::info!("All {} sessions stopped", reports.len());
        }
        reports
    }
}

impl Drop for AdapterRegistry {
    fn drop(&mut self) {
        if !self.sessions.is_empty() {
            tracing::warn!("AdapterRegistry dropped with running sessions; stopping them");
            self.shutdown_all();
        }
    }
}
