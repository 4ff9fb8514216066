//! Sensor monitoring agent binary.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use airwatch_agent::config::DriverKind;
use airwatch_agent::platform::{HostWatchdog, SysfsLink};
use airwatch_agent::simulated::SimulatedBus;
use airwatch_agent::{
    Agent, AgentConfig, AgentError, AgentState, HttpServer, LogDisplay, MetricsStore,
};

/// Sensor monitoring agent.
#[derive(Parser, Debug)]
#[command(name = "airwatch-agent")]
#[command(about = "Expose bus sensors as Prometheus metrics")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long)]
    config: Option<String>,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (overrides config).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        AgentConfig::load_from_file(config_path)?
    } else {
        AgentConfig::default()
    };

    // Override from CLI
    if let Some(listen) = args.listen {
        config.http.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;

    airwatch_common::init_tracing(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = args.config.as_deref().unwrap_or("<defaults>"),
        "Starting airwatch agent"
    );

    let listen_addr: SocketAddr = config.http.listen.parse().map_err(
        |e: std::net::AddrParseError| AgentError::InvalidListen {
            addr: config.http.listen.clone(),
            reason: e.to_string(),
        },
    )?;

    let now = Instant::now();
    let state = Arc::new(AgentState::new(Arc::new(MetricsStore::new()), now));

    // Collaborators
    let bus = match config.bus.driver {
        DriverKind::Simulated => SimulatedBus::new(&config.bus),
    };
    let watchdog = HostWatchdog::from_config(config.supervisor.watchdog_device.as_deref())
        .map_err(AgentError::from)?;
    let link = SysfsLink::new(config.supervisor.interface.clone());
    let display = LogDisplay::new(config.display.utc_offset_hours);

    let agent = Agent::new(&config, bus, watchdog, link, display, state.clone(), now);

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start HTTP server
    let http_server = HttpServer::new(state.clone(), listen_addr, config.http.path.clone());
    let listener = http_server.bind().await?;
    let http_shutdown = shutdown_rx.clone();
    let http_task = tokio::spawn(async move {
        if let Err(e) = http_server.serve(listener, http_shutdown).await {
            error!("HTTP server error: {}", e);
        }
    });

    // Forward signals to the shutdown channel
    tokio::spawn(async move {
        wait_for_signal().await;
        if shutdown_tx.send(true).is_err() {
            warn!("Shutdown signal had no receivers");
        }
    });

    agent.run(shutdown_rx).await;

    // Wait for the HTTP server to drain
    let _ = tokio::time::timeout(Duration::from_secs(5), http_task).await;

    info!("Agent stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down...");
                    }
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down..."),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C, running until killed");
            std::future::pending::<()>().await;
        }
    }
}
