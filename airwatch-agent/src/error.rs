//! Agent error type.

use std::net::SocketAddr;

use crate::config::ConfigError;
use crate::supervisor::WatchdogError;

/// Errors that stop the agent from starting or serving.
///
/// Sensor and network faults are handled inside the loop and never surface
/// here.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Watchdog error: {0}")]
    Watchdog(#[from] WatchdogError),

    #[error("Invalid listen address {addr}: {reason}")]
    InvalidListen { addr: String, reason: String },

    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(#[source] std::io::Error),
}
