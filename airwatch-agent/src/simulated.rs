//! Simulated sensor bus.
//!
//! Fabricates plausible readings for the configured sensors so the agent
//! can run on a host with no hardware attached.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use airwatch_common::{Field, SensorAddress, SensorKind};
use rand::Rng;
use tracing::trace;

use crate::bus::{DriverError, Measurement, SensorBus};
use crate::config::{BusConfig, KnownSensor};

/// Connection to a simulated sensor.
#[derive(Debug)]
pub struct SimulatedConnection {
    address: SensorAddress,
    kind: SensorKind,
    reads: u64,
}

impl SimulatedConnection {
    pub fn address(&self) -> SensorAddress {
        self.address
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }
}

/// A bus whose sensors exist only in memory.
pub struct SimulatedBus {
    sensors: BTreeMap<SensorAddress, SensorKind>,
    absent: BTreeSet<SensorAddress>,
    failure_rate: f64,
}

impl SimulatedBus {
    /// Create a simulated bus populated from the known-address table.
    pub fn new(config: &BusConfig) -> Self {
        Self::with_sensors(
            &config.sensors,
            config.simulation.absent.iter().copied(),
            config.simulation.failure_rate,
        )
    }

    pub fn with_sensors(
        sensors: &[KnownSensor],
        absent: impl IntoIterator<Item = SensorAddress>,
        failure_rate: f64,
    ) -> Self {
        Self {
            sensors: sensors.iter().map(|s| (s.address, s.kind)).collect(),
            absent: absent.into_iter().collect(),
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    /// Plug or unplug the sensor at `address`.
    pub fn set_present(&mut self, address: SensorAddress, present: bool) {
        if present {
            self.absent.remove(&address);
        } else {
            self.absent.insert(address);
        }
    }

    fn is_present(&self, address: SensorAddress) -> bool {
        self.sensors.contains_key(&address) && !self.absent.contains(&address)
    }

    fn fabricate(kind: SensorKind, rng: &mut impl Rng) -> Measurement {
        match kind {
            SensorKind::Bme680 => vec![
                (Field::Temperature, rng.random_range(19.0..27.0)),
                (Field::Humidity, rng.random_range(38.0..55.0)),
                (Field::Pressure, rng.random_range(1005.0..1016.0)),
                (Field::Gas, rng.random_range(80_000.0..130_000.0)),
            ],
            SensorKind::Scd4x => vec![
                (Field::Co2, rng.random_range(420.0f64..1200.0).round()),
                (Field::Temperature, rng.random_range(19.0..27.0)),
                (Field::Humidity, rng.random_range(38.0..55.0)),
            ],
        }
    }
}

impl SensorBus for SimulatedBus {
    type Connection = SimulatedConnection;

    fn probe(&mut self, address: SensorAddress) -> bool {
        self.is_present(address)
    }

    fn open(
        &mut self,
        address: SensorAddress,
        kind: SensorKind,
    ) -> Result<Self::Connection, DriverError> {
        match self.sensors.get(&address) {
            _ if !self.is_present(address) => Err(DriverError::NotPresent(address)),
            Some(found) if *found != kind => Err(DriverError::Init(format!(
                "expected {} at {}, found {}",
                kind, address, found
            ))),
            _ => Ok(SimulatedConnection {
                address,
                kind,
                reads: 0,
            }),
        }
    }

    fn read(
        &mut self,
        connection: &mut Self::Connection,
        _timeout: Duration,
    ) -> Result<Measurement, DriverError> {
        if !self.is_present(connection.address) {
            return Err(DriverError::Nack(connection.address));
        }

        let mut rng = rand::rng();
        if self.failure_rate > 0.0 && rng.random_bool(self.failure_rate) {
            return Err(DriverError::Checksum(connection.address));
        }

        connection.reads += 1;
        trace!(
            address = %connection.address,
            kind = %connection.kind,
            reads = connection.reads,
            "Simulated read"
        );

        Ok(Self::fabricate(connection.kind, &mut rng))
    }

    fn serial_number(&mut self, connection: &Self::Connection) -> Option<String> {
        // Only the SCD4x exposes a serial over the bus.
        match connection.kind {
            SensorKind::Scd4x => Some(format!("0x5cd4{:04x}", connection.address.value())),
            SensorKind::Bme680 => None,
        }
    }

    fn close(&mut self, connection: Self::Connection) {
        trace!(address = %connection.address, "Simulated close");
    }
}
