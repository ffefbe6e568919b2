//! Background services: the periodic adapter refresher and the bandwidth
//! reporter. Both are tokio interval tasks; driver and session calls block,
//! so each tick runs them on the blocking pool.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::core::bandwidth::format_bytes;
use crate::registry::{AdapterDiff, AdapterRegistry};

/// Which adapters get a session when they appear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterSelection {
    All,
    Named(HashSet<String>),
}

impl AdapterSelection {
    pub fn from_names(names: &[String]) -> Self {
        if names.is_empty() {
            AdapterSelection::All
        } else {
            AdapterSelection::Named(names.iter().cloned().collect())
        }
    }

    pub fn wants(&self, adapter: &str) -> bool {
        match self {
            AdapterSelection::All => true,
            AdapterSelection::Named(names) => names.contains(adapter),
        }
    }
}

/// One refresh cycle: diff the adapter list, then start filtering every
/// selected adapter that just appeared. A failing adapter is logged and
/// skipped; it is retried only if it disappears and comes back.
pub fn refresh_and_start(registry: &AdapterRegistry, selection: &AdapterSelection) -> AdapterDiff {
    let diff = match registry.refresh() {
        Ok(diff) => diff,
        Err(e) => {
            tracing::warn!("Adapter refresh failed: {e}");
            return AdapterDiff::default();
        }
    };
    for info in diff.added.iter().filter(|info| selection.wants(&info.name)) {
        if let Err(e) = registry.start_filtering(&info.name) {
            tracing::error!("Failed to start filtering on {}: {e}", info.name);
        }
    }
    diff
}

/// Spawn the adapter refresher. The first refresh runs immediately.
pub fn start_adapter_refresher(
    registry: Arc<AdapterRegistry>,
    selection: AdapterSelection,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    let selection = Arc::new(selection);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reg = Arc::clone(&registry);
            let sel = Arc::clone(&selection);
            if let Err(e) = tokio::task::spawn_blocking(move || refresh_and_start(&reg, &sel)).await {
                tracing::error!("Adapter refresh task failed: {e}");
            }
        }
    })
}

/// Spawn a task that logs each session's rates and totals every `interval`.
pub fn start_bandwidth_reporter(
    registry: Arc<AdapterRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let rates = registry.sample_rates();
            let snapshots = registry.snapshots();
            for (name, rate) in rates {
                let Some(snap) = snapshots.iter().find(|s| s.name == name) else {
                    continue;
                };
                tracing::info!(
                    "{name}: in {} ({} total), out {} ({} total)",
                    format_speed_compact(rate.inbound_bps),
                    format_bytes(snap.inbound_bytes),
                    format_speed_compact(rate.outbound_bps),
                    format_bytes(snap.outbound_bytes),
                );
            }
        }
    })
}

/// Format a speed value in a compact human-readable form.
pub fn format_speed_compact(bps: f64) -> String {
    if bps < 1024.0 {
        format!("{:.0} B/s", bps)
    } else if bps < 1024.0 * 1024.0 {
        format!("{:.1} KB/s", bps / 1024.0)
    } else {
        format!("{:.2} MB/s", bps / (1024.0 * 1024.0))
    }
}
