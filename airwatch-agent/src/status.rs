//! State shared between the agent loop and the HTTP server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use airwatch_common::{AgentStatus, AttachedSensor, NetworkStatus};
use parking_lot::RwLock;

use crate::exporter::AgentMetrics;
use crate::store::SharedStore;

/// Agent name reported in status documents.
pub const AGENT_NAME: &str = "airwatch-agent";

/// Agent version reported in status documents.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Loop-owned values published once per iteration.
#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub attached: Vec<AttachedSensor>,
    pub network: NetworkStatus,
    pub last_discovery: Option<Instant>,
    pub next_discovery: Option<Instant>,
    pub last_display_update: Option<Instant>,
}

impl Default for RuntimeStatus {
    fn default() -> Self {
        Self {
            attached: Vec::new(),
            network: NetworkStatus::Connected,
            last_discovery: None,
            next_discovery: None,
            last_display_update: None,
        }
    }
}

/// The metrics store plus the loop's latest published status.
pub struct AgentState {
    store: SharedStore,
    started: Instant,
    runtime: RwLock<RuntimeStatus>,
}

impl AgentState {
    pub fn new(store: SharedStore, started: Instant) -> Self {
        Self {
            store,
            started,
            runtime: RwLock::new(RuntimeStatus::default()),
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn publish(&self, status: RuntimeStatus) {
        *self.runtime.write() = status;
    }

    pub fn runtime(&self) -> RuntimeStatus {
        self.runtime.read().clone()
    }

    pub fn uptime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started)
    }

    /// Whether any sensor kind has produced a reading yet.
    pub fn is_ready(&self) -> bool {
        self.store.has_samples()
    }

    /// Status document for `/status`.
    pub fn status(&self, now: Instant) -> AgentStatus {
        let runtime = self.runtime();
        let snapshot = self.store.snapshot(now);

        AgentStatus {
            agent: AGENT_NAME.to_string(),
            version: VERSION.to_string(),
            uptime_secs: self.uptime(now).as_secs(),
            network: runtime.network,
            attached: runtime.attached,
            sensors: snapshot.entries().iter().map(|e| e.liveness()).collect(),
            last_discovery_age_secs: runtime
                .last_discovery
                .map_or(0.0, |at| now.saturating_duration_since(at).as_secs_f64()),
            next_discovery_secs: runtime
                .next_discovery
                .map_or(0.0, |at| at.saturating_duration_since(now).as_secs_f64()),
        }
    }

    /// Agent section of `/metrics`.
    pub fn agent_metrics(&self, now: Instant, measurement_time: Duration) -> AgentMetrics {
        let runtime = self.runtime();

        AgentMetrics {
            measurement_time,
            last_discovery_age: runtime
                .last_discovery
                .map(|at| now.saturating_duration_since(at)),
            next_discovery: runtime
                .next_discovery
                .map_or(Duration::ZERO, |at| at.saturating_duration_since(now)),
            attached: runtime.attached,
            network_connected: runtime.network == NetworkStatus::Connected,
            uptime: self.uptime(now),
            last_display_update_age: runtime
                .last_display_update
                .map(|at| now.saturating_duration_since(at)),
            version: VERSION,
        }
    }
}

/// Create a shareable state handle.
pub type SharedState = Arc<AgentState>;
