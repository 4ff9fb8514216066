//! Prometheus text exposition of the metrics store.

use std::collections::HashSet;
use std::io::Write;
use std::time::Duration;

use airwatch_common::AttachedSensor;

use crate::store::{EntrySnapshot, Snapshot};

/// Content type for Prometheus text format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

const IS_ERROR_METRIC: &str = "sensor_is_error";
const IS_ERROR_HELP: &str = "1 if the last sample attempt failed";
const AGE_METRIC: &str = "last_measurement_time";
const AGE_HELP: &str = "Seconds since the last successful measurement";

/// Agent-level values exported after the sensor section.
#[derive(Debug, Clone)]
pub struct AgentMetrics {
    /// Time spent taking the snapshot and rendering the sensor section.
    pub measurement_time: Duration,
    pub last_discovery_age: Option<Duration>,
    pub next_discovery: Duration,
    pub attached: Vec<AttachedSensor>,
    pub network_connected: bool,
    pub uptime: Duration,
    pub last_display_update_age: Option<Duration>,
    pub version: &'static str,
}

/// Accumulates gauge lines, writing HELP and TYPE once per metric name.
struct Exposition {
    output: Vec<u8>,
    described: HashSet<&'static str>,
}

impl Exposition {
    fn new(capacity: usize) -> Self {
        Self {
            output: Vec::with_capacity(capacity),
            described: HashSet::new(),
        }
    }

    fn describe(&mut self, name: &'static str, help: &str) {
        if self.described.insert(name) {
            writeln!(self.output, "# HELP {} {}", name, help).ok();
            writeln!(self.output, "# TYPE {} gauge", name).ok();
        }
    }

    fn gauge(&mut self, name: &'static str, help: &str, labels: &str, value: f64) {
        self.describe(name, help);
        writeln!(self.output, "{}{} {}", name, labels, format_value(value)).ok();
    }

    /// Info metrics keep their integer value.
    fn info(&mut self, name: &'static str, help: &str, labels: &str) {
        self.describe(name, help);
        writeln!(self.output, "{}{} 1", name, labels).ok();
    }

    fn finish(self) -> String {
        String::from_utf8(self.output).unwrap_or_default()
    }
}

/// Render the sensor section for every entry in the snapshot.
///
/// A healthy entry exports one line per field of its reading followed by
/// its age. An erroring entry exports only `sensor_is_error 1` and its age,
/// so stale values are never presented as current.
pub fn render(snapshot: &Snapshot) -> String {
    let mut exposition = Exposition::new(snapshot.entries().len() * 512);

    for entry in snapshot.entries() {
        render_entry(&mut exposition, entry);
    }

    exposition.finish()
}

fn render_entry(exposition: &mut Exposition, entry: &EntrySnapshot) {
    let labels = format!("{{sensor_type=\"{}\"}}", entry.kind.as_str());

    match (&entry.reading, entry.is_error) {
        (Some(reading), false) => {
            for (field, value) in reading.iter() {
                exposition.gauge(field.metric_name(), field.help(), &labels, value);
            }
        }
        _ => exposition.gauge(IS_ERROR_METRIC, IS_ERROR_HELP, &labels, 1.0),
    }

    exposition.gauge(AGE_METRIC, AGE_HELP, &labels, entry.age.as_secs_f64());
}

/// Render the agent section.
pub fn render_agent(metrics: &AgentMetrics) -> String {
    let mut exposition = Exposition::new(1024);

    exposition.gauge(
        "agent_measurement_time_seconds",
        "Time spent producing the sensor section of this response",
        "",
        metrics.measurement_time.as_secs_f64(),
    );
    if let Some(age) = metrics.last_discovery_age {
        exposition.gauge(
            "agent_last_discovery_age_seconds",
            "Seconds since the last bus scan",
            "",
            age.as_secs_f64(),
        );
    }
    exposition.gauge(
        "agent_next_discovery_seconds",
        "Seconds until the next bus scan",
        "",
        metrics.next_discovery.as_secs_f64(),
    );
    exposition.gauge(
        "agent_attached_sensors",
        "Number of sensors with an open handle",
        "",
        metrics.attached.len() as f64,
    );
    exposition.gauge(
        "agent_network_connected",
        "1 if the network link is up",
        "",
        if metrics.network_connected { 1.0 } else { 0.0 },
    );
    exposition.gauge(
        "agent_uptime_seconds",
        "Seconds since the agent started",
        "",
        metrics.uptime.as_secs_f64(),
    );
    if let Some(age) = metrics.last_display_update_age {
        exposition.gauge(
            "agent_last_display_update_age_seconds",
            "Seconds since the display was last refreshed",
            "",
            age.as_secs_f64(),
        );
    }

    let labels = format!("{{version=\"{}\"}}", escape_label_value(metrics.version));
    exposition.info("agent_info", "Agent build information", &labels);

    for sensor in &metrics.attached {
        exposition.info("sensor_info", "Sensor info", &sensor_info_labels(sensor));
    }

    exposition.finish()
}

fn sensor_info_labels(sensor: &AttachedSensor) -> String {
    let mut labels = format!(
        "{{sensor_type=\"{}\",sensor_name=\"{}\",address=\"{}\"",
        sensor.kind.as_str(),
        sensor.kind.model_name(),
        sensor.address
    );
    if let Some(serial) = &sensor.serial_number {
        labels.push_str(&format!(",serial_number=\"{}\"", escape_label_value(serial)));
    }
    labels.push('}');
    labels
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a value with three decimals.
fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else {
        format!("{:.3}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MetricsStore, SampleOutcome};
    use airwatch_common::{Field, Reading, SensorAddress, SensorKind};
    use std::time::Instant;

    fn bme680(now: Instant) -> Reading {
        Reading::new(
            SensorKind::Bme680,
            [
                (Field::Temperature, 26.261),
                (Field::Humidity, 47.443),
                (Field::Pressure, 1010.372),
                (Field::Gas, 107925.0),
            ],
            now,
        )
    }

    fn sample_lines(output: &str) -> Vec<&str> {
        output.lines().filter(|l| !l.starts_with('#')).collect()
    }

    #[test]
    fn test_render_empty_snapshot() {
        let store = MetricsStore::new();
        assert_eq!(render(&store.snapshot(Instant::now())), "");
    }

    #[test]
    fn test_render_healthy_bme680() {
        let store = MetricsStore::new();
        let now = Instant::now();
        store.update(SensorKind::Bme680, SampleOutcome::Success(bme680(now)), now);

        let output = render(&store.snapshot(now));

        assert_eq!(
            sample_lines(&output),
            vec![
                "sensor_temperature_celsius{sensor_type=\"bme680\"} 26.261",
                "sensor_humidity_percent{sensor_type=\"bme680\"} 47.443",
                "sensor_pressure_hpa{sensor_type=\"bme680\"} 1010.372",
                "sensor_gas_ohms{sensor_type=\"bme680\"} 107925.000",
                "last_measurement_time{sensor_type=\"bme680\"} 0.000",
            ]
        );
        assert!(!output.contains("sensor_is_error"));
        assert!(output.contains("# TYPE sensor_gas_ohms gauge"));
        assert!(output.contains("# HELP sensor_temperature_celsius Temperature in Celsius"));
    }

    #[test]
    fn test_render_erroring_kind_suppresses_values() {
        let store = MetricsStore::new();
        let now = Instant::now();
        store.update(SensorKind::Bme680, SampleOutcome::Success(bme680(now)), now);
        store.update(
            SensorKind::Bme680,
            SampleOutcome::Failure("nack".into()),
            now + Duration::from_secs(5),
        );

        let output = render(&store.snapshot(now + Duration::from_secs(7)));

        assert_eq!(
            sample_lines(&output),
            vec![
                "sensor_is_error{sensor_type=\"bme680\"} 1.000",
                "last_measurement_time{sensor_type=\"bme680\"} 7.000",
            ]
        );
    }

    #[test]
    fn test_help_written_once_per_name() {
        let store = MetricsStore::new();
        let now = Instant::now();
        store.update(SensorKind::Bme680, SampleOutcome::Success(bme680(now)), now);
        store.update(
            SensorKind::Scd4x,
            SampleOutcome::Success(Reading::new(
                SensorKind::Scd4x,
                [
                    (Field::Co2, 612.0),
                    (Field::Temperature, 24.1),
                    (Field::Humidity, 51.0),
                ],
                now,
            )),
            now,
        );

        let output = render(&store.snapshot(now));

        assert_eq!(
            output
                .matches("# HELP sensor_temperature_celsius ")
                .count(),
            1
        );
        assert_eq!(output.matches("# TYPE last_measurement_time gauge").count(), 1);
        assert!(output.contains("sensor_temperature_celsius{sensor_type=\"scd4x\"} 24.100"));
        assert!(output.contains("sensor_co2_ppm{sensor_type=\"scd4x\"} 612.000"));

        // bme680 is rendered before scd4x
        let bme = output.find("sensor_type=\"bme680\"").unwrap();
        let scd = output.find("sensor_type=\"scd4x\"").unwrap();
        assert!(bme < scd);
    }

    #[test]
    fn test_render_agent_section() {
        let output = render_agent(&AgentMetrics {
            measurement_time: Duration::from_millis(2),
            last_discovery_age: Some(Duration::from_secs(30)),
            next_discovery: Duration::from_secs(330),
            attached: vec![
                AttachedSensor {
                    address: SensorAddress::new(0x77),
                    kind: SensorKind::Bme680,
                    serial_number: None,
                },
                AttachedSensor {
                    address: SensorAddress::new(0x62),
                    kind: SensorKind::Scd4x,
                    serial_number: Some("0x5cd40062".into()),
                },
            ],
            network_connected: true,
            uptime: Duration::from_secs(90),
            last_display_update_age: Some(Duration::from_millis(1500)),
            version: "0.2.0",
        });

        assert!(output.contains("agent_measurement_time_seconds 0.002"));
        assert!(output.contains("agent_last_discovery_age_seconds 30.000"));
        assert!(output.contains("agent_next_discovery_seconds 330.000"));
        assert!(output.contains("agent_attached_sensors 2.000"));
        assert!(output.contains("agent_network_connected 1.000"));
        assert!(output.contains("agent_uptime_seconds 90.000"));
        assert!(output.contains("agent_last_display_update_age_seconds 1.500"));
        assert!(output.contains("agent_info{version=\"0.2.0\"} 1"));
        assert!(output.contains(
            "sensor_info{sensor_type=\"bme680\",sensor_name=\"BME680\",address=\"0x77\"} 1"
        ));
        assert!(output.contains(
            "sensor_info{sensor_type=\"scd4x\",sensor_name=\"SCD4X\",address=\"0x62\",serial_number=\"0x5cd40062\"} 1"
        ));
        assert_eq!(output.matches("# TYPE sensor_info gauge").count(), 1);
    }

    #[test]
    fn test_render_agent_before_first_scan() {
        let output = render_agent(&AgentMetrics {
            measurement_time: Duration::ZERO,
            last_discovery_age: None,
            next_discovery: Duration::ZERO,
            attached: Vec::new(),
            network_connected: false,
            uptime: Duration::ZERO,
            last_display_update_age: None,
            version: "0.2.0",
        });

        assert!(!output.contains("agent_last_discovery_age_seconds"));
        assert!(!output.contains("agent_last_display_update_age_seconds"));
        assert!(!output.contains("sensor_info"));
        assert!(output.contains("agent_network_connected 0.000"));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(1.0), "1.000");
        assert_eq!(format_value(0.0004), "0.000");
        assert_eq!(format_value(f64::NAN), "NaN");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
    }

    #[test]
    fn test_escape_label_value() {
        assert_eq!(escape_label_value("a\"b"), "a\\\"b");
        assert_eq!(escape_label_value("x\\y"), "x\\\\y");
    }
}
