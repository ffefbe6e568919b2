//! Host packet filter.
//!
//! Each network adapter gets its own capture loop ([`capture::session`]):
//! frames read from the driver are decoded into a layered
//! [`packet::ProtocolView`] and run through an ordered pipeline of
//! [`core::module::FirewallModule`]s. Dropped frames go to a per-adapter
//! pcap block log ([`pcap`]); everything else is re-injected in its
//! original direction. [`registry::AdapterRegistry`] tracks adapters and
//! their sessions, and [`services`] keeps it refreshed.
//!
//! Binaries call [`init_tracing`] once, then [`run`] with a capture driver
//! and a future that resolves when the firewall should stop.

pub mod capture;
pub mod config;
pub mod core;
pub mod error;
pub mod modules;
pub mod packet;
pub mod pcap;
pub mod registry;
pub mod services;

use std::sync::Arc;

use capture::CaptureDriver;
use config::FirewallOptions;
use error::FirewallError;
use registry::AdapterRegistry;
use services::AdapterSelection;

/// Install the tracing subscriber and a panic hook that logs through it.
/// `RUST_LOG` overrides the default `firewall=info` filter.
pub fn init_tracing() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC in firewall: {info}");
        default_hook(info);
    }));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "firewall=info,firewall_lib=info".into()),
        )
        .init();
}

/// Run the firewall on `driver` until `stop` resolves, then tear every
/// session down. Returns the number of sessions that released with errors.
pub async fn run<F>(
    driver: Arc<dyn CaptureDriver>,
    options: &FirewallOptions,
    selection: AdapterSelection,
    stop: F,
) -> Result<usize, FirewallError>
where
    F: std::future::Future<Output = ()>,
{
    options.validate()?;
    let registry = Arc::new(AdapterRegistry::new(driver, options));

    let refresher = services::start_adapter_refresher(
        Arc::clone(&registry),
        selection,
        std::time::Duration::from_secs(options.refresh_interval_secs),
    );
    let reporter = services::start_bandwidth_reporter(
        Arc::clone(&registry),
        std::time::Duration::from_secs(config::BANDWIDTH_REPORT_INTERVAL_SECS),
    );
    tracing::info!("Firewall running; block logs go to {}", options.block_log_dir.display());

    stop.await;
    refresher.abort();
    reporter.abort();

    let reg = Arc::clone(&registry);
    let reports = tokio::task::spawn_blocking(move || reg.shutdown_all())
        .await
        .map_err(|e| FirewallError::InvalidInput(format!("shutdown task failed: {e}")))?;

    let mut failed = 0;
    for (name, report) in reports {
        if let Err(e) = report.into_result(&name) {
            tracing::error!("{e}");
            failed += 1;
        }
    }
    tracing::info!("Firewall stopped");
    Ok(failed)
}
