//! Periodic sampling of attached sensors.

use std::time::{Duration, Instant};

use airwatch_common::{Reading, SensorKind};
use tracing::{debug, warn};

use crate::bus::{DriverError, SensorBus};
use crate::registry::{SensorHandle, SensorRegistry};
use crate::schedule;
use crate::store::{MetricsStore, SampleOutcome};

/// Counts from one sampling pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl SampleReport {
    pub fn sampled(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Reads every due sensor and records the outcome in the store.
#[derive(Debug, Clone)]
pub struct Sampler {
    interval: Duration,
    timeout: Duration,
}

impl Sampler {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sample every handle whose deadline has passed.
    ///
    /// Each sampled handle becomes due again one interval after `now`,
    /// whatever the outcome.
    pub fn run_due<B: SensorBus>(
        &self,
        registry: &mut SensorRegistry<B>,
        bus: &mut B,
        store: &MetricsStore,
        now: Instant,
    ) -> SampleReport {
        let mut report = SampleReport::default();

        for handle in registry.iter_mut().filter(|h| h.is_due(now)) {
            let kind = handle.kind();
            match self.sample(handle, bus, now) {
                Ok(reading) => {
                    debug!(
                        address = %handle.address(),
                        kind = %kind,
                        fields = reading.len(),
                        timestamp_ms = reading.timestamp_ms(),
                        "Sample complete"
                    );
                    store.update(kind, SampleOutcome::Success(reading), now);
                    report.succeeded += 1;
                }
                Err(e) => {
                    warn!(address = %handle.address(), kind = %kind, error = %e, "Sample failed");
                    store.update(kind, SampleOutcome::Failure(e.to_string()), now);
                    report.failed += 1;
                }
            }
            handle.set_next_sample(schedule::after(now, self.interval));
        }

        report
    }

    fn sample<B: SensorBus>(
        &self,
        handle: &mut SensorHandle<B::Connection>,
        bus: &mut B,
        now: Instant,
    ) -> Result<Reading, DriverError> {
        let kind: SensorKind = handle.kind();
        let started = Instant::now();
        let measurement = bus.read(handle.connection_mut(), self.timeout)?;

        // A driver that overran its deadline counts as timed out.
        if started.elapsed() > self.timeout {
            return Err(DriverError::Timeout(self.timeout));
        }

        let reading = Reading::new(kind, measurement, now);
        if reading.is_empty() {
            return Err(DriverError::Read(format!("no {} fields in reading", kind)));
        }
        Ok(reading)
    }
}
