use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::error::Error;

/// A 7-bit address on the shared sensor bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorAddress(u8);

impl SensorAddress {
    /// Lowest non-reserved 7-bit address.
    pub const MIN: u8 = 0x08;
    /// Highest non-reserved 7-bit address.
    pub const MAX: u8 = 0x77;

    pub const fn new(address: u8) -> Self {
        Self(address)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    /// Whether the address lies outside the reserved ranges.
    pub fn is_valid(self) -> bool {
        (Self::MIN..=Self::MAX).contains(&self.0)
    }
}

impl From<u8> for SensorAddress {
    fn from(address: u8) -> Self {
        Self(address)
    }
}

impl std::fmt::Display for SensorAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

impl FromStr for SensorAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => trimmed.parse::<u8>(),
        };

        parsed
            .map(SensorAddress)
            .map_err(|_| Error::InvalidAddress(s.to_string()))
    }
}

/// Supported sensor models.
///
/// Each kind declares the fields it produces through [`SensorKind::fields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    /// Bosch BME680 environmental sensor.
    Bme680,
    /// Sensirion SCD4x CO2 sensor.
    Scd4x,
}

impl SensorKind {
    /// Every supported kind, in export order.
    pub const ALL: [SensorKind; 2] = [SensorKind::Bme680, SensorKind::Scd4x];

    /// Number of supported kinds.
    pub const COUNT: usize = Self::ALL.len();

    /// Label value used in the metrics output.
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Bme680 => "bme680",
            SensorKind::Scd4x => "scd4x",
        }
    }

    /// Human readable model name.
    pub fn model_name(&self) -> &'static str {
        match self {
            SensorKind::Bme680 => "BME680",
            SensorKind::Scd4x => "SCD4X",
        }
    }

    /// Fields produced by this kind, in export order.
    pub fn fields(&self) -> &'static [Field] {
        match self {
            SensorKind::Bme680 => &[
                Field::Temperature,
                Field::Humidity,
                Field::Pressure,
                Field::Gas,
            ],
            SensorKind::Scd4x => &[Field::Co2, Field::Temperature, Field::Humidity],
        }
    }

    /// Whether this kind reports the given field.
    pub fn produces(&self, field: Field) -> bool {
        self.fields().contains(&field)
    }

    /// Address the part answers on out of the box.
    pub fn default_address(&self) -> SensorAddress {
        match self {
            SensorKind::Bme680 => SensorAddress(0x77),
            SensorKind::Scd4x => SensorAddress(0x62),
        }
    }

    /// Dense index, used for fixed-size per-kind tables.
    pub fn index(&self) -> usize {
        match self {
            SensorKind::Bme680 => 0,
            SensorKind::Scd4x => 1,
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bme680" => Ok(SensorKind::Bme680),
            "scd4x" | "scd40" | "scd41" => Ok(SensorKind::Scd4x),
            _ => Err(Error::UnknownKind(s.to_string())),
        }
    }
}

/// A physical quantity reported by a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Temperature,
    Humidity,
    Pressure,
    Gas,
    Co2,
}

impl Field {
    /// Exported metric name.
    pub fn metric_name(&self) -> &'static str {
        match self {
            Field::Temperature => "sensor_temperature_celsius",
            Field::Humidity => "sensor_humidity_percent",
            Field::Pressure => "sensor_pressure_hpa",
            Field::Gas => "sensor_gas_ohms",
            Field::Co2 => "sensor_co2_ppm",
        }
    }

    /// HELP text for the exported metric.
    pub fn help(&self) -> &'static str {
        match self {
            Field::Temperature => "Temperature in Celsius",
            Field::Humidity => "Relative humidity in percent",
            Field::Pressure => "Pressure in hectopascal",
            Field::Gas => "Gas resistance in ohms",
            Field::Co2 => "CO2 in parts per million",
        }
    }
}

/// One successful measurement of a sensor.
///
/// Readings are immutable once built; the store shares them behind an `Arc`
/// so every field of a reading always belongs to the same capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    kind: SensorKind,
    values: BTreeMap<Field, f64>,
    captured_at: Instant,
    timestamp: i64,
}

impl Reading {
    /// Build a reading, keeping only the fields `kind` produces.
    pub fn new(
        kind: SensorKind,
        values: impl IntoIterator<Item = (Field, f64)>,
        captured_at: Instant,
    ) -> Self {
        let values = values
            .into_iter()
            .filter(|(field, _)| kind.produces(*field))
            .collect();

        Self {
            kind,
            values,
            captured_at,
            timestamp: current_timestamp_millis(),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn get(&self, field: Field) -> Option<f64> {
        self.values.get(&field).copied()
    }

    /// Field values in the kind's export order.
    pub fn iter(&self) -> impl Iterator<Item = (Field, f64)> + '_ {
        self.kind
            .fields()
            .iter()
            .filter_map(|field| self.get(*field).map(|value| (*field, value)))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Monotonic instant the sample was taken.
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Wall-clock capture time in Unix epoch milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp
    }
}

/// Get the current timestamp in milliseconds since Unix epoch.
///
/// Returns 0 if system time is before Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
