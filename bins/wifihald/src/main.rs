//! wifihald - WiFi vendor HAL daemon.
//!
//! Initializes the HAL, runs its event loop and cleans up on SIGINT or
//! SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::oneshot;
use wifihal::{HalConfig, WifiHal, hal};

#[derive(Parser)]
#[command(name = "wifihald", version, about = "WiFi vendor HAL daemon")]
struct Cli {
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Primary WiFi interface.
    #[arg(short, long)]
    iface: Option<String>,

    /// Control socket path.
    #[arg(long)]
    ctrl_socket: Option<PathBuf>,

    /// Do not create the control socket.
    #[arg(long, conflicts_with = "ctrl_socket")]
    no_ctrl_socket: bool,

    /// Wait for the driver to bring up the primary interface first.
    #[arg(short, long)]
    wait: bool,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,

    /// Raise log verbosity (repeat for more).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn hal_config(&self) -> anyhow::Result<HalConfig> {
        let mut config = match &self.config {
            Some(path) => HalConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => HalConfig::default(),
        };
        if let Some(iface) = &self.iface {
            config = config.primary_iface(iface.clone());
        }
        if let Some(path) = &self.ctrl_socket {
            config = config.ctrl_socket_path(path.clone());
        }
        if self.no_ctrl_socket {
            config = config.ctrl_socket(false);
        }
        Ok(config)
    }
}

fn log_level(verbose: u8) -> tracing::Level {
    match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(log_level(cli.verbose).into()),
        )
        .init();

    let config = cli.hal_config()?;
    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    if cli.wait {
        hal::wait_for_driver_ready(&config)
            .await
            .context("driver did not come up")?;
    }

    let hal = WifiHal::initialize(config)
        .await
        .context("HAL initialization failed")?;
    for iface in hal.get_ifaces() {
        tracing::info!(iface = iface.name(), index = iface.index(), "managing interface");
    }

    let runner = Arc::clone(&hal);
    let event_loop = tokio::spawn(async move { runner.event_loop().await });

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
        _ = sigterm.recv() => tracing::info!("terminated"),
    }

    let (done_tx, done_rx) = oneshot::channel();
    hal.cleanup(move || {
        let _ = done_tx.send(());
    });
    event_loop.await??;
    done_rx.await.context("cleanup handler was not called")?;
    tracing::info!("exiting");

    Ok(())
}
