//! Configuration for the sensor agent.

use airwatch_common::{LoggingConfig, SensorAddress, SensorKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::schedule::MAX_PERIOD;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Metrics HTTP endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Sensor bus settings.
    #[serde(default)]
    pub bus: BusConfig,

    /// Watchdog and network supervision settings.
    #[serde(default)]
    pub supervisor: SupervisorConfig,

    /// Display refresh settings.
    #[serde(default)]
    pub display: DisplayConfig,

    /// Main loop settings.
    #[serde(default)]
    pub agent: LoopConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metrics HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:9100").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:9100".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// Which bus driver backs the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Fabricated readings, no hardware required.
    #[default]
    Simulated,
}

/// An entry of the known-address table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownSensor {
    /// Bus address the part answers on.
    pub address: SensorAddress,
    /// Model expected at that address.
    pub kind: SensorKind,
}

/// Sensor bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus driver.
    #[serde(default)]
    pub driver: DriverKind,

    /// Known-address table probed on every discovery.
    #[serde(default = "default_sensors")]
    pub sensors: Vec<KnownSensor>,

    /// Rediscovery period in seconds (default: 360).
    #[serde(default = "default_discovery_period")]
    pub discovery_period_secs: u64,

    /// Per-sensor sampling period in seconds (default: 5).
    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    /// Upper bound for a single sensor read in milliseconds (default: 1000).
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,

    /// Simulated bus behaviour.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn default_sensors() -> Vec<KnownSensor> {
    SensorKind::ALL
        .iter()
        .map(|kind| KnownSensor {
            address: kind.default_address(),
            kind: *kind,
        })
        .collect()
}

fn default_discovery_period() -> u64 {
    360
}

fn default_sample_interval() -> u64 {
    5
}

fn default_read_timeout() -> u64 {
    1000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            driver: DriverKind::default(),
            sensors: default_sensors(),
            discovery_period_secs: default_discovery_period(),
            sample_interval_secs: default_sample_interval(),
            read_timeout_ms: default_read_timeout(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl BusConfig {
    pub fn discovery_period(&self) -> Duration {
        Duration::from_secs(self.discovery_period_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Longest time one sampling pass can block, every sensor timing out.
    pub fn worst_case_sampling(&self) -> Duration {
        self.read_timeout()
            .saturating_mul(u32::try_from(self.sensors.len()).unwrap_or(u32::MAX))
    }
}

/// Simulated bus behaviour.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Probability in `[0, 1]` that a read fails.
    #[serde(default)]
    pub failure_rate: f64,

    /// Known addresses that do not answer probes.
    #[serde(default)]
    pub absent: Vec<SensorAddress>,
}

/// Watchdog and network supervision configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Hardware watchdog timeout in seconds (default: 15).
    #[serde(default = "default_watchdog_timeout")]
    pub watchdog_timeout_secs: u64,

    /// Safety margin subtracted from the timeout to get the feed period (default: 3).
    #[serde(default = "default_watchdog_margin")]
    pub watchdog_margin_secs: u64,

    /// Watchdog device node (e.g. "/dev/watchdog"); no hardware watchdog when unset.
    #[serde(default)]
    pub watchdog_device: Option<String>,

    /// Network health check period in seconds (default: 5).
    #[serde(default = "default_network_check_interval")]
    pub network_check_interval_secs: u64,

    /// Time a lost network may take to come back before reloading (default: 60).
    #[serde(default = "default_reconnect_grace")]
    pub reconnect_grace_secs: u64,

    /// Network interface to watch (e.g. "wlan0"); assumed always up when unset.
    #[serde(default)]
    pub interface: Option<String>,
}

fn default_watchdog_timeout() -> u64 {
    15
}

fn default_watchdog_margin() -> u64 {
    3
}

fn default_network_check_interval() -> u64 {
    5
}

fn default_reconnect_grace() -> u64 {
    60
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout_secs: default_watchdog_timeout(),
            watchdog_margin_secs: default_watchdog_margin(),
            watchdog_device: None,
            network_check_interval_secs: default_network_check_interval(),
            reconnect_grace_secs: default_reconnect_grace(),
            interface: None,
        }
    }
}

impl SupervisorConfig {
    /// Period between two watchdog feeds.
    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(
            self.watchdog_timeout_secs
                .saturating_sub(self.watchdog_margin_secs),
        )
    }

    pub fn network_check_interval(&self) -> Duration {
        Duration::from_secs(self.network_check_interval_secs)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_secs(self.reconnect_grace_secs)
    }
}

/// Display refresh configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Whether the display is refreshed at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Refresh period in seconds (default: 10).
    #[serde(default = "default_display_interval")]
    pub update_interval_secs: u64,

    /// Offset from UTC applied to the "last update" clock (default: 1).
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,
}

fn default_true() -> bool {
    true
}

fn default_display_interval() -> u64 {
    10
}

fn default_utc_offset() -> i32 {
    1
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_secs: default_display_interval(),
            utc_offset_hours: default_utc_offset(),
        }
    }
}

impl DisplayConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

/// Main loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Sleep between two loop iterations in milliseconds (default: 100).
    #[serde(default = "default_loop_delay")]
    pub loop_delay_ms: u64,
}

fn default_loop_delay() -> u64 {
    100
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            loop_delay_ms: default_loop_delay(),
        }
    }
}

impl LoopConfig {
    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_delay_ms)
    }
}

impl AgentConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bus = &self.bus;
        let supervisor = &self.supervisor;

        if bus.discovery_period_secs == 0 {
            return Err(ConfigError::Validation(
                "discovery_period_secs must be > 0".to_string(),
            ));
        }

        let periods = [
            ("discovery_period_secs", bus.discovery_period()),
            ("sample_interval_secs", bus.sample_interval()),
            ("read_timeout_ms", bus.read_timeout()),
            ("watchdog_timeout_secs", Duration::from_secs(supervisor.watchdog_timeout_secs)),
            ("network_check_interval_secs", supervisor.network_check_interval()),
            ("reconnect_grace_secs", supervisor.reconnect_grace()),
            ("update_interval_secs", self.display.update_interval()),
            ("loop_delay_ms", self.agent.loop_delay()),
        ];
        if let Some((name, _)) = periods.iter().find(|(_, period)| *period > MAX_PERIOD) {
            return Err(ConfigError::Validation(format!(
                "{} must not exceed {} seconds",
                name,
                MAX_PERIOD.as_secs()
            )));
        }

        if bus.sample_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "sample_interval_secs must be > 0".to_string(),
            ));
        }

        if bus.read_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "read_timeout_ms must be > 0".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&bus.simulation.failure_rate) {
            return Err(ConfigError::Validation(
                "simulation.failure_rate must be within [0, 1]".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for sensor in &bus.sensors {
            if !sensor.address.is_valid() {
                return Err(ConfigError::Validation(format!(
                    "Sensor address {} is outside {:#04x}..={:#04x}",
                    sensor.address,
                    SensorAddress::MIN,
                    SensorAddress::MAX
                )));
            }
            if !seen.insert(sensor.address) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate sensor address {}",
                    sensor.address
                )));
            }
        }

        if supervisor.watchdog_margin_secs >= supervisor.watchdog_timeout_secs {
            return Err(ConfigError::Validation(
                "watchdog_margin_secs must be smaller than watchdog_timeout_secs".to_string(),
            ));
        }

        // Sensors due together are read back to back before the heartbeat
        // runs, so a full pass plus one loop delay must fit in the margin.
        // Staying under the sample interval keeps a sensor out of two
        // consecutive passes.
        let step_budget = bus.worst_case_sampling() + self.agent.loop_delay();
        if step_budget >= Duration::from_secs(supervisor.watchdog_margin_secs) {
            return Err(ConfigError::Validation(format!(
                "{} sensors x read_timeout_ms plus loop_delay_ms ({:?}) must be shorter than watchdog_margin_secs",
                bus.sensors.len(),
                step_budget
            )));
        }
        if step_budget >= bus.sample_interval() {
            return Err(ConfigError::Validation(format!(
                "{} sensors x read_timeout_ms plus loop_delay_ms ({:?}) must be shorter than sample_interval_secs",
                bus.sensors.len(),
                step_budget
            )));
        }

        if supervisor.network_check_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "network_check_interval_secs must be > 0".to_string(),
            ));
        }

        if self.display.update_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "update_interval_secs must be > 0".to_string(),
            ));
        }

        if !(-23..=23).contains(&self.display.utc_offset_hours) {
            return Err(ConfigError::Validation(
                "utc_offset_hours must be within -23..=23".to_string(),
            ));
        }

        if self.agent.loop_delay_ms == 0 {
            return Err(ConfigError::Validation(
                "loop_delay_ms must be > 0".to_string(),
            ));
        }

        // Validate listen address format
        if self.http.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.http.listen
            )));
        }

        // Validate path starts with /
        if !self.http.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airwatch_common::LogFormat;

    #[test]
    fn test_parse_minimal_config() {
        let config = AgentConfig::parse("{}").unwrap();

        assert_eq!(config.http.listen, "0.0.0.0:9100");
        assert_eq!(config.http.path, "/metrics");
        assert_eq!(config.bus.driver, DriverKind::Simulated);
        assert_eq!(config.bus.discovery_period_secs, 360);
        assert_eq!(config.bus.sample_interval_secs, 5);
        assert_eq!(config.supervisor.watchdog_timeout_secs, 15);
        assert_eq!(config.supervisor.heartbeat_period(), Duration::from_secs(12));
        assert_eq!(config.supervisor.reconnect_grace_secs, 60);
        assert!(config.display.enabled);
        assert_eq!(config.agent.loop_delay_ms, 100);

        assert_eq!(
            config.bus.sensors,
            vec![
                KnownSensor {
                    address: SensorAddress::new(0x77),
                    kind: SensorKind::Bme680,
                },
                KnownSensor {
                    address: SensorAddress::new(0x62),
                    kind: SensorKind::Scd4x,
                },
            ]
        );
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            http: {
                listen: "127.0.0.1:9200",
                path: "/sensors/metrics",
            },
            bus: {
                driver: "simulated",
                sensors: [
                    { address: 0x76, kind: "bme680" },
                ],
                discovery_period_secs: 60,
                sample_interval_secs: 2,
                read_timeout_ms: 250,
                simulation: { failure_rate: 0.25, absent: [0x76] },
            },
            supervisor: {
                watchdog_timeout_secs: 30,
                watchdog_margin_secs: 5,
                watchdog_device: "/dev/watchdog0",
                network_check_interval_secs: 10,
                reconnect_grace_secs: 120,
                interface: "wlan0",
            },
            display: { enabled: false, update_interval_secs: 30, utc_offset_hours: -5 },
            agent: { loop_delay_ms: 50 },
            logging: { level: "debug", format: "json" },
        }"#;

        let config = AgentConfig::parse(json).unwrap();

        assert_eq!(config.http.listen, "127.0.0.1:9200");
        assert_eq!(config.http.path, "/sensors/metrics");
        assert_eq!(config.bus.sensors.len(), 1);
        assert_eq!(config.bus.sensors[0].address, SensorAddress::new(0x76));
        assert_eq!(config.bus.read_timeout(), Duration::from_millis(250));
        assert_eq!(config.bus.simulation.absent, vec![SensorAddress::new(0x76)]);
        assert_eq!(config.supervisor.heartbeat_period(), Duration::from_secs(25));
        assert_eq!(
            config.supervisor.watchdog_device.as_deref(),
            Some("/dev/watchdog0")
        );
        assert_eq!(config.supervisor.interface.as_deref(), Some("wlan0"));
        assert!(!config.display.enabled);
        assert_eq!(config.display.utc_offset_hours, -5);
        assert_eq!(config.agent.loop_delay(), Duration::from_millis(50));
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_validate_invalid_listen() {
        let result = AgentConfig::parse(r#"{ http: { listen: "not-an-address" } }"#);
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Invalid listen address")
        );
    }

    #[test]
    fn test_validate_invalid_path() {
        let result = AgentConfig::parse(r#"{ http: { path: "metrics" } }"#);
        assert!(result.unwrap_err().to_string().contains("must start with /"));
    }

    #[test]
    fn test_validate_margin_exceeds_timeout() {
        let json = r#"{
            supervisor: { watchdog_timeout_secs: 10, watchdog_margin_secs: 10 }
        }"#;

        assert!(AgentConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_sampling_pass_must_fit_watchdog_margin() {
        // Two reads of 1.9 s each would hold the loop past a 3 s watchdog.
        let json = r#"{
            bus: { read_timeout_ms: 1900 },
            supervisor: { watchdog_timeout_secs: 3, watchdog_margin_secs: 1 },
        }"#;

        let err = AgentConfig::parse(json).unwrap_err().to_string();
        assert!(err.contains("watchdog_margin_secs"), "{}", err);

        // One sensor at 1.9 s plus the loop delay still overruns a 2 s margin.
        let json = r#"{
            bus: { sensors: [ { address: 0x77, kind: "bme680" } ], read_timeout_ms: 1900 },
            supervisor: { watchdog_timeout_secs: 15, watchdog_margin_secs: 2 },
        }"#;
        assert!(AgentConfig::parse(json).is_err());

        let json = r#"{
            bus: { read_timeout_ms: 400 },
            supervisor: { watchdog_timeout_secs: 3, watchdog_margin_secs: 1 },
        }"#;
        assert!(AgentConfig::parse(json).is_ok());
    }

    #[test]
    fn test_validate_sampling_pass_must_fit_sample_interval() {
        let json = r#"{
            bus: { sample_interval_secs: 1, read_timeout_ms: 600 },
            supervisor: { watchdog_timeout_secs: 15, watchdog_margin_secs: 5 },
        }"#;

        let err = AgentConfig::parse(json).unwrap_err().to_string();
        assert!(err.contains("sample_interval_secs"), "{}", err);
    }

    #[test]
    fn test_validate_periods_bounded() {
        for json in [
            "{ bus: { discovery_period_secs: 18446744073709551615 } }",
            "{ bus: { sample_interval_secs: 86401 } }",
            "{ supervisor: { network_check_interval_secs: 18446744073709551615 } }",
            "{ supervisor: { reconnect_grace_secs: 100000 } }",
            "{ display: { update_interval_secs: 86401 } }",
            "{ agent: { loop_delay_ms: 86400001 } }",
        ] {
            let err = AgentConfig::parse(json).unwrap_err().to_string();
            assert!(err.contains("must not exceed 86400 seconds"), "{}: {}", json, err);
        }

        assert!(AgentConfig::parse("{ bus: { discovery_period_secs: 86400 } }").is_ok());
    }

    #[test]
    fn test_validate_duplicate_address() {
        let json = r#"{
            bus: {
                sensors: [
                    { address: 0x77, kind: "bme680" },
                    { address: 0x77, kind: "scd4x" },
                ],
            },
        }"#;

        let err = AgentConfig::parse(json).unwrap_err().to_string();
        assert!(err.contains("Duplicate sensor address 0x77"));
    }

    #[test]
    fn test_validate_reserved_address() {
        let json = r#"{ bus: { sensors: [ { address: 0x7f, kind: "scd4x" } ] } }"#;
        assert!(AgentConfig::parse(json).is_err());
    }

    #[test]
    fn test_validate_zero_periods() {
        assert!(AgentConfig::parse("{ bus: { discovery_period_secs: 0 } }").is_err());
        assert!(AgentConfig::parse("{ bus: { sample_interval_secs: 0 } }").is_err());
        assert!(AgentConfig::parse("{ supervisor: { network_check_interval_secs: 0 } }").is_err());
        assert!(AgentConfig::parse("{ agent: { loop_delay_ms: 0 } }").is_err());
    }

    #[test]
    fn test_validate_failure_rate_range() {
        let json = "{ bus: { simulation: { failure_rate: 1.5 } } }";
        assert!(AgentConfig::parse(json).is_err());
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ http: {{ listen: \"127.0.0.1:9999\" }} }}").unwrap();

        let config = AgentConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.http.listen, "127.0.0.1:9999");
    }
}
