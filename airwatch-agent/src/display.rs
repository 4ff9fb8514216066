//! Local status display.

use std::net::IpAddr;

use airwatch_common::{Field, SensorKind};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use tracing::info;

use crate::store::{EntrySnapshot, Snapshot};

/// Something that shows the latest readings on the device.
pub trait Display {
    fn render(&mut self, snapshot: &Snapshot, address: Option<IpAddr>);
}

/// Text shown on one display refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayFrame {
    /// Model shown on the sensor line, if any kind is healthy.
    pub sensor: Option<&'static str>,
    pub temperature: Option<String>,
    pub humidity: Option<String>,
    pub pressure: Option<String>,
    pub address: String,
    pub last_update: String,
}

impl DisplayFrame {
    /// Build a frame from the primary sensor of the snapshot.
    ///
    /// A healthy BME680 is preferred. The SCD4x is used otherwise and has
    /// no pressure reading. Erroring kinds are skipped, leaving the sensor
    /// line empty when neither kind is healthy.
    pub fn compose(
        snapshot: &Snapshot,
        address: Option<IpAddr>,
        local_time: DateTime<FixedOffset>,
    ) -> Self {
        let primary = [SensorKind::Bme680, SensorKind::Scd4x]
            .into_iter()
            .filter_map(|kind| snapshot.get(kind))
            .find(|entry| !entry.is_error && entry.reading.is_some());

        let value = |field: Field| -> Option<f64> {
            primary
                .and_then(|e: &EntrySnapshot| e.reading.as_ref())
                .and_then(|r| r.get(field))
        };

        Self {
            sensor: primary.map(|e| e.kind.model_name()),
            temperature: value(Field::Temperature).map(|v| format!("{:.1} C", v)),
            humidity: value(Field::Humidity).map(|v| format!("{:.1} %", v)),
            pressure: value(Field::Pressure).map(|v| format!("{:.2}", v)),
            address: address.map_or_else(|| "no address".to_string(), |a| a.to_string()),
            last_update: local_time
                .format("Last update %-m/%-d/%Y %H:%M:%S")
                .to_string(),
        }
    }

    /// The sensor line, with missing values left out.
    pub fn sensor_line(&self) -> String {
        [&self.temperature, &self.humidity, &self.pressure]
            .into_iter()
            .flatten()
            .cloned()
            .collect::<Vec<_>>()
            .join("  ")
    }
}

/// Writes display frames to the log.
pub struct LogDisplay {
    offset: FixedOffset,
    last_frame: Option<DisplayFrame>,
}

impl LogDisplay {
    pub fn new(utc_offset_hours: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_hours.saturating_mul(3600))
            .unwrap_or_else(|| Utc.fix());
        Self {
            offset,
            last_frame: None,
        }
    }

    pub fn last_frame(&self) -> Option<&DisplayFrame> {
        self.last_frame.as_ref()
    }
}

impl Display for LogDisplay {
    fn render(&mut self, snapshot: &Snapshot, address: Option<IpAddr>) {
        let local_time = Utc::now().with_timezone(&self.offset);
        let frame = DisplayFrame::compose(snapshot, address, local_time);

        info!(
            sensor = frame.sensor.unwrap_or("none"),
            readings = %frame.sensor_line(),
            address = %frame.address,
            "{}",
            frame.last_update
        );
        self.last_frame = Some(frame);
    }
}
