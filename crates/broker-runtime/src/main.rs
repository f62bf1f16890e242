//! # shvbroker
//!
//! Startup sequence:
//!
//! 1. Parse the command line
//! 2. Initialize logging
//! 3. Load configuration (file, then `SHV_*` environment overrides)
//! 4. Bind listeners and start the sweep task
//! 5. Run until ctrl-c, reloading configuration on SIGHUP

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use broker_runtime::{Args, BrokerRuntime, FileConfigSource};
use shv_broker::ConfigSource;
use shv_telemetry::{init_logging, log_event, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let telemetry = TelemetryConfig::from_env()
        .with_verbosity(args.verbose, args.quiet)
        .with_debug_topics(args.debug.iter().cloned());
    init_logging(&telemetry).context("Failed to initialize logging")?;

    let source = Arc::new(FileConfigSource::new(args.config.clone()));
    let config = source.load().context("Failed to load configuration")?;

    if args.dump_config {
        print!("{}", toml::to_string_pretty(&config).context("Failed to serialize configuration")?);
        return Ok(());
    }

    let runtime = Arc::new(
        BrokerRuntime::with_config(source, &config).context("Invalid configuration")?,
    );
    log_event!(
        info,
        "runtime",
        "Starting broker",
        name = %config.name,
        version = shv_broker::VERSION
    );
    runtime.start().await?;

    #[cfg(unix)]
    runtime
        .spawn_reload_on_hangup()
        .context("Failed to install SIGHUP handler")?;

    info!("Broker is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    runtime.shutdown().await;
    Ok(())
}
