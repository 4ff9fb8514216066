//! Sensor bus driver interface.
//!
//! The agent core never speaks a sensor's wire protocol itself. Everything
//! model-specific sits behind [`SensorBus`], which exposes the four
//! operations the core needs: probe an address, open a connection, read
//! one measurement within a deadline, and close the connection. Drivers
//! may also report a part's serial number.

use std::time::Duration;

use airwatch_common::{Field, SensorAddress, SensorKind};

/// Error type for driver operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DriverError {
    #[error("No device answered at {0}")]
    NotPresent(SensorAddress),
    #[error("Bus NACK from {0}")]
    Nack(SensorAddress),
    #[error("Checksum mismatch from {0}")]
    Checksum(SensorAddress),
    #[error("Read timed out after {0:?}")]
    Timeout(Duration),
    #[error("Initialization failed: {0}")]
    Init(String),
    #[error("Read failed: {0}")]
    Read(String),
}

/// Raw field values returned by a driver read.
pub type Measurement = Vec<(Field, f64)>;

/// A shared bus with one or more sensors attached.
///
/// Implementations must bound every call: `read` in particular must give up
/// once `timeout` has elapsed so the caller always regains control.
pub trait SensorBus {
    /// Driver-owned connection state for one sensor.
    type Connection;

    /// Whether a device currently answers at `address`.
    fn probe(&mut self, address: SensorAddress) -> bool;

    /// Open a connection to the sensor of `kind` at `address`.
    fn open(
        &mut self,
        address: SensorAddress,
        kind: SensorKind,
    ) -> Result<Self::Connection, DriverError>;

    /// Read one measurement, giving up after `timeout`.
    fn read(
        &mut self,
        connection: &mut Self::Connection,
        timeout: Duration,
    ) -> Result<Measurement, DriverError>;

    /// Factory serial number of an opened sensor, if the part reports one.
    fn serial_number(&mut self, _connection: &Self::Connection) -> Option<String> {
        None
    }

    /// Release a connection.
    fn close(&mut self, connection: Self::Connection);
}
