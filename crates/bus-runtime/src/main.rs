//! # Sovereign Bus Runtime
//!
//! Runs the event bus with the commerce subscribers until Ctrl+C, or runs
//! a scripted demo flow and exits.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use bus_runtime::{load_config, BusRuntime};
use sovereign_telemetry::{init_telemetry, TelemetryConfig};

/// Sovereign event bus runtime
#[derive(Parser, Debug)]
#[command(name = "bus-runtime")]
#[command(about = "In-process event bus hosting the commerce domain subscribers")]
struct Args {
    /// TOML file with bus configuration (SB_* environment variables still apply)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Publish a scripted checkout flow, print statistics and exit
    #[arg(long)]
    demo: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let _telemetry = init_telemetry(TelemetryConfig::from_env())?;

    // Load configuration
    let config = load_config(args.config.as_deref())?;

    let runtime = BusRuntime::new(config);
    runtime.start()?;

    if args.demo {
        runtime.run_demo().await?;
    } else {
        info!("Event bus is running. Press Ctrl+C to stop.");
        tokio::signal::ctrl_c().await?;
    }

    // Graceful shutdown
    runtime.shutdown().await;

    Ok(())
}
