//! Sensor monitoring agent.
//!
//! Discovers sensors on a shared bus, samples them on a fixed cadence and
//! exposes the latest readings as Prometheus metrics, while keeping the
//! device alive through a hardware watchdog and recovering from network
//! loss.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Bus scanner │──>│   Registry   │──>│   Sampler    │──>│ Metrics store│
//! │ (discovery)  │   │  (handles)   │   │ (per sensor) │   │  (per kind)  │
//! └──────────────┘   └──────────────┘   └──────────────┘   └──────┬───────┘
//!                                                                 │
//!        ┌──────────────┐                                  ┌──────▼───────┐
//!        │  Supervisor  │  watchdog + network              │  HTTP server │
//!        └──────────────┘                                  │  (/metrics)  │
//!                                                          └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! airwatch-agent --config agent.json5
//! ```
//!
//! See [`config::AgentConfig`] for configuration options.

pub mod agent;
pub mod bus;
pub mod config;
pub mod display;
pub mod error;
pub mod exporter;
pub mod http;
pub mod platform;
pub mod registry;
pub mod sampler;
pub mod scanner;
pub mod schedule;
pub mod simulated;
pub mod status;
pub mod store;
pub mod supervisor;

pub use agent::{Agent, StepReport};
pub use bus::{DriverError, Measurement, SensorBus};
pub use config::AgentConfig;
pub use display::{Display, LogDisplay};
pub use error::AgentError;
pub use http::HttpServer;
pub use registry::SensorRegistry;
pub use scanner::{BusScanner, ScanResult};
pub use status::{AgentState, SharedState};
pub use store::{MetricsStore, SampleOutcome, SharedStore, Snapshot};
pub use supervisor::{NetworkLink, Supervisor, Watchdog};
