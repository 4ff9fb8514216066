//! Bus discovery.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use airwatch_common::{SensorAddress, SensorKind};
use tracing::debug;

use crate::bus::SensorBus;
use crate::config::KnownSensor;
use crate::schedule::Periodic;

/// Addresses that answered a scan, with the kind expected there.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    found: BTreeMap<SensorAddress, SensorKind>,
}

impl ScanResult {
    pub fn new(found: impl IntoIterator<Item = (SensorAddress, SensorKind)>) -> Self {
        Self {
            found: found.into_iter().collect(),
        }
    }

    pub fn contains(&self, address: SensorAddress) -> bool {
        self.found.contains_key(&address)
    }

    pub fn kind_at(&self, address: SensorAddress) -> Option<SensorKind> {
        self.found.get(&address).copied()
    }

    /// Found sensors in address order.
    pub fn iter(&self) -> impl Iterator<Item = (SensorAddress, SensorKind)> + '_ {
        self.found.iter().map(|(a, k)| (*a, *k))
    }

    pub fn addresses(&self) -> impl Iterator<Item = SensorAddress> + '_ {
        self.found.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.found.len()
    }

    pub fn is_empty(&self) -> bool {
        self.found.is_empty()
    }
}

/// Probes the known-address table on a fixed rediscovery period.
pub struct BusScanner {
    table: Vec<KnownSensor>,
    schedule: Periodic,
}

impl BusScanner {
    /// Create a scanner whose first scan is due at `now`.
    pub fn new(table: Vec<KnownSensor>, period: Duration, now: Instant) -> Self {
        Self {
            table,
            schedule: Periodic::immediate(period, now),
        }
    }

    pub fn table(&self) -> &[KnownSensor] {
        &self.table
    }

    /// Probe every known address once.
    pub fn scan<B: SensorBus>(&self, bus: &mut B) -> ScanResult {
        let found = self
            .table
            .iter()
            .filter(|known| bus.probe(known.address))
            .map(|known| (known.address, known.kind));

        let result = ScanResult::new(found);
        debug!(
            probed = self.table.len(),
            found = result.len(),
            "Bus scan complete"
        );
        result
    }

    /// Scan if the rediscovery period has elapsed.
    pub fn poll<B: SensorBus>(&mut self, bus: &mut B, now: Instant) -> Option<ScanResult> {
        self.schedule.poll(now).then(|| self.scan(bus))
    }

    /// When the last scan ran.
    pub fn last_scan(&self) -> Option<Instant> {
        self.schedule.last_run()
    }

    /// Time until the next scan.
    pub fn next_scan_in(&self, now: Instant) -> Duration {
        self.schedule.remaining(now)
    }
}
