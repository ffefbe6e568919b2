use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use firewall_lib::capture::replay::ReplayDriver;
use firewall_lib::capture::CaptureDriver;
use firewall_lib::config::FirewallOptions;
use firewall_lib::services::AdapterSelection;

#[derive(Parser, Debug)]
#[command(author, version, about = "Host packet filter: per-adapter module pipeline with pcap block logs")]
struct Args {
    /// JSON options file (defaults apply to anything it leaves out)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Replay these pcap files instead of capturing live (repeatable)
    #[arg(long = "replay", short = 'r')]
    replay: Vec<PathBuf>,

    /// Only filter adapters with these names (repeatable; default: all)
    #[arg(long = "adapter", short = 'a')]
    adapters: Vec<String>,

    /// Print the adapters the driver reports and exit
    #[arg(long, default_value_t = false)]
    list_adapters: bool,
}

fn live_driver() -> Result<Arc<dyn CaptureDriver>> {
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(firewall_lib::capture::windivert_backend::WinDivertDriver::new()))
    }
    #[cfg(not(target_os = "windows"))]
    {
        anyhow::bail!("no live capture backend on this platform; use --replay <PCAP>")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    firewall_lib::init_tracing();

    let options = match &args.config {
        Some(path) => FirewallOptions::from_json_file(path)
            .with_context(|| format!("loading options from {}", path.display()))?,
        None => FirewallOptions::default(),
    };

    let selection = AdapterSelection::from_names(&args.adapters);
    let replay = if args.replay.is_empty() {
        None
    } else {
        let mut driver = ReplayDriver::new(&args.replay, &options.block_log_dir)?;
        if !args.list_adapters && driver.retain_adapters(|name| selection.wants(name)) == 0 {
            anyhow::bail!("no replay capture matches the selected adapters");
        }
        Some(Arc::new(driver))
    };
    let driver: Arc<dyn CaptureDriver> = match &replay {
        Some(r) => Arc::clone(r) as Arc<dyn CaptureDriver>,
        None => live_driver()?,
    };

    if args.list_adapters {
        for adapter in driver.enumerate_adapters()? {
            println!("{}\t{}", adapter.name, adapter.description);
        }
        return Ok(());
    }

    let stop_replay = replay.clone();
    let stop = async move {
        match stop_replay {
            Some(r) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = async {
                        while !r.is_drained() {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    } => tracing::info!("Replay finished"),
                }
            }
            None => {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl-C: {e}");
                }
            }
        }
    };

    let failed = firewall_lib::run(driver, &options, selection, stop).await?;
    if replay.is_some_and(|r| r.opened() == 0) {
        anyhow::bail!("no replay capture could be opened");
    }
    if failed > 0 {
        anyhow::bail!("{failed} adapter session(s) released resources with errors");
    }
    Ok(())
}
