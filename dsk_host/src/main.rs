//! # DSK Host Binary
//!
//! Creates the devices listed in a host configuration, wires their PVs and
//! keeps them alive until Ctrl-C.
//!
//! # Usage
//!
//! ```bash
//! # Run until interrupted
//! dsk_host --config config/host.toml
//!
//! # Apply the configuration, print a status snapshot and exit
//! dsk_host --config config/host.toml --once
//!
//! # Verbose JSON logs
//! dsk_host -c config/host.toml -v --json
//! ```

use clap::Parser;
use dsk_common::config::{ConfigLoader, HostConfig, LogLevel};
use dsk_host::Host;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// DSK Host - device-support trees in a single process
#[derive(Parser, Debug)]
#[command(name = "dsk_host")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Runs device-support trees with an in-process control system")]
#[command(long_about = None)]
struct Args {
    /// Path to the host configuration file.
    #[arg(short, long, default_value = "config/host.toml")]
    config: PathBuf,

    /// Enable verbose logging (overrides the configured level)
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    /// Apply the configuration, print the status as JSON and exit
    #[arg(long)]
    once: bool,
}

fn main() {
    if let Err(e) = run() {
        error!("Host failed: {}", e);
        eprintln!("dsk_host: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = HostConfig::load(&args.config)?;
    setup_tracing(&args, config.shared.log_level);
    info!(
        "DSK Host v{} starting with {:?}",
        env!("CARGO_PKG_VERSION"),
        args.config
    );

    let mut host = Host::from_config(&config)?;

    if args.once {
        let status = serde_json::to_string_pretty(&host.control_system().status_json())?;
        println!("{status}");
    } else {
        let running = host.running_flag();
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            running.store(false, Ordering::SeqCst);
        })?;
        host.run();
    }

    host.shutdown();
    info!("DSK Host shutdown complete");
    Ok(())
}

/// Setup tracing subscriber from the configured level and CLI flags.
fn setup_tracing(args: &Args, configured: LogLevel) {
    let level = if args.verbose {
        LogLevel::Debug
    } else {
        configured
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
