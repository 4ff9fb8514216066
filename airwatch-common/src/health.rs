//! Health and liveness types served on the agent's `/status` endpoint.
//!
//! These types are plain data so that tools consuming the endpoint can
//! deserialize them without pulling in the agent itself.

use serde::{Deserialize, Serialize};

use crate::sensor::{SensorAddress, SensorKind};

/// Sensor availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorStatus {
    /// Last sample succeeded.
    Online,
    /// Last sample failed, but fewer than the offline threshold in a row.
    Degraded,
    /// Repeated failures, or no sensor of this kind is attached.
    Offline,
}

impl std::fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorStatus::Online => write!(f, "online"),
            SensorStatus::Degraded => write!(f, "degraded"),
            SensorStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Network health as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Connected,
    Disconnected,
    AwaitingReload,
}

impl std::fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NetworkStatus::Connected => write!(f, "connected"),
            NetworkStatus::Disconnected => write!(f, "disconnected"),
            NetworkStatus::AwaitingReload => write!(f, "awaiting_reload"),
        }
    }
}

/// A sensor currently held by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedSensor {
    pub address: SensorAddress,
    pub kind: SensorKind,
    /// Serial number read when the connection was opened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

/// Per-kind liveness information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorLiveness {
    /// Sensor kind.
    pub kind: SensorKind,
    /// Current status.
    pub status: SensorStatus,
    /// Seconds since the last successful measurement.
    pub age_secs: f64,
    /// Successful samples since boot.
    pub successes: u64,
    /// Failed samples since boot.
    pub failures: u64,
    /// Consecutive failures count.
    pub consecutive_failures: u32,
    /// Last error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Whole-agent status document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    /// Agent name.
    pub agent: String,
    /// Agent version.
    pub version: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Network state.
    pub network: NetworkStatus,
    /// Sensors currently attached to the bus.
    #[serde(default)]
    pub attached: Vec<AttachedSensor>,
    /// Liveness of every kind seen since boot.
    #[serde(default)]
    pub sensors: Vec<SensorLiveness>,
    /// Seconds since the last bus discovery.
    pub last_discovery_age_secs: f64,
    /// Seconds until the next bus discovery.
    pub next_discovery_secs: f64,
}
