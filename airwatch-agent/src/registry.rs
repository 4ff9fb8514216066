//! Attached sensor registry.
//!
//! Keeps exactly one open handle per address that answered the latest scan.

use std::collections::BTreeMap;
use std::time::Instant;

use airwatch_common::{AttachedSensor, SensorAddress, SensorKind};
use tracing::{info, warn};

use crate::bus::{DriverError, SensorBus};
use crate::scanner::ScanResult;

/// An open connection to one attached sensor.
#[derive(Debug)]
pub struct SensorHandle<C> {
    address: SensorAddress,
    kind: SensorKind,
    connection: C,
    serial_number: Option<String>,
    next_sample: Instant,
}

impl<C> SensorHandle<C> {
    pub fn address(&self) -> SensorAddress {
        self.address
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn next_sample(&self) -> Instant {
        self.next_sample
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_sample
    }

    pub(crate) fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub(crate) fn set_next_sample(&mut self, at: Instant) {
        self.next_sample = at;
    }

    fn describe(&self) -> AttachedSensor {
        AttachedSensor {
            address: self.address,
            kind: self.kind,
            serial_number: self.serial_number.clone(),
        }
    }
}

/// What a reconciliation pass changed.
#[derive(Debug, Default)]
pub struct Reconciliation {
    pub attached: Vec<AttachedSensor>,
    pub detached: Vec<AttachedSensor>,
    pub failed: Vec<(SensorAddress, DriverError)>,
}

impl Reconciliation {
    /// Whether the pass left the registry untouched.
    pub fn is_unchanged(&self) -> bool {
        self.attached.is_empty() && self.detached.is_empty()
    }
}

/// Open handles keyed by bus address.
pub struct SensorRegistry<B: SensorBus> {
    handles: BTreeMap<SensorAddress, SensorHandle<B::Connection>>,
}

impl<B: SensorBus> SensorRegistry<B> {
    pub fn new() -> Self {
        Self {
            handles: BTreeMap::new(),
        }
    }

    /// Bring the registry in line with a scan result.
    ///
    /// Handles whose address vanished, or now answers as another kind, are
    /// closed. Newly found addresses are opened and become due for sampling
    /// at `now`. A failed open is logged and retried on the next scan.
    /// Reconciling twice against the same result changes nothing.
    pub fn reconcile(&mut self, bus: &mut B, scan: &ScanResult, now: Instant) -> Reconciliation {
        let mut outcome = Reconciliation::default();

        let stale: Vec<SensorAddress> = self
            .handles
            .values()
            .filter(|h| scan.kind_at(h.address) != Some(h.kind))
            .map(|h| h.address)
            .collect();

        for address in stale {
            if let Some(handle) = self.handles.remove(&address) {
                info!(address = %handle.address, kind = %handle.kind, "Sensor detached");
                outcome.detached.push(handle.describe());
                bus.close(handle.connection);
            }
        }

        for (address, kind) in scan.iter() {
            if self.handles.contains_key(&address) {
                continue;
            }

            match bus.open(address, kind) {
                Ok(connection) => {
                    let serial_number = bus.serial_number(&connection);
                    info!(
                        address = %address,
                        kind = %kind,
                        serial = serial_number.as_deref().unwrap_or("-"),
                        "Sensor attached"
                    );
                    let handle = SensorHandle {
                        address,
                        kind,
                        connection,
                        serial_number,
                        next_sample: now,
                    };
                    outcome.attached.push(handle.describe());
                    self.handles.insert(address, handle);
                }
                Err(e) => {
                    warn!(address = %address, kind = %kind, error = %e, "Failed to open sensor");
                    outcome.failed.push((address, e));
                }
            }
        }

        outcome
    }

    /// Kinds that lost their last handle in `outcome`.
    pub fn orphaned_kinds(&self, outcome: &Reconciliation) -> Vec<SensorKind> {
        let mut kinds: Vec<SensorKind> = outcome
            .detached
            .iter()
            .map(|s| s.kind)
            .filter(|kind| !self.has_kind(*kind))
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    pub fn has_kind(&self, kind: SensorKind) -> bool {
        self.handles.values().any(|h| h.kind == kind)
    }

    pub fn contains(&self, address: SensorAddress) -> bool {
        self.handles.contains_key(&address)
    }

    pub fn get(&self, address: SensorAddress) -> Option<&SensorHandle<B::Connection>> {
        self.handles.get(&address)
    }

    /// Handles in address order.
    pub fn iter(&self) -> impl Iterator<Item = &SensorHandle<B::Connection>> {
        self.handles.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SensorHandle<B::Connection>> {
        self.handles.values_mut()
    }

    pub fn attached(&self) -> Vec<AttachedSensor> {
        self.handles.values().map(SensorHandle::describe).collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Close every handle.
    pub fn close_all(&mut self, bus: &mut B) {
        for (_, handle) in std::mem::take(&mut self.handles) {
            bus.close(handle.connection);
        }
    }
}

impl<B: SensorBus> Default for SensorRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KnownSensor;
    use crate::simulated::SimulatedBus;
    use std::time::Duration;

    const BME: SensorAddress = SensorAddress::new(0x77);
    const SCD: SensorAddress = SensorAddress::new(0x62);

    fn bus() -> SimulatedBus {
        SimulatedBus::with_sensors(
            &[
                KnownSensor {
                    address: BME,
                    kind: SensorKind::Bme680,
                },
                KnownSensor {
                    address: SCD,
                    kind: SensorKind::Scd4x,
                },
            ],
            [],
            0.0,
        )
    }

    fn both() -> ScanResult {
        ScanResult::new([(BME, SensorKind::Bme680), (SCD, SensorKind::Scd4x)])
    }

    #[test]
    fn test_attach_new_sensors_due_immediately() {
        let mut bus = bus();
        let mut registry = SensorRegistry::new();
        let now = Instant::now();

        let outcome = registry.reconcile(&mut bus, &both(), now);

        assert_eq!(outcome.attached.len(), 2);
        assert!(outcome.detached.is_empty());
        assert_eq!(registry.len(), 2);
        assert!(registry.iter().all(|h| h.is_due(now)));
    }

    #[test]
    fn test_serial_number_read_on_attach() {
        let mut bus = bus();
        let mut registry = SensorRegistry::new();

        registry.reconcile(&mut bus, &both(), Instant::now());

        assert_eq!(registry.get(SCD).unwrap().serial_number(), Some("0x5cd40062"));
        assert_eq!(registry.get(BME).unwrap().serial_number(), None);
        let attached = registry.attached();
        assert_eq!(attached[0].kind, SensorKind::Scd4x);
        assert_eq!(attached[0].serial_number.as_deref(), Some("0x5cd40062"));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut bus = bus();
        let mut registry = SensorRegistry::new();
        let now = Instant::now();

        registry.reconcile(&mut bus, &both(), now);
        registry
            .iter_mut()
            .for_each(|h| h.set_next_sample(now + Duration::from_secs(5)));

        let outcome = registry.reconcile(&mut bus, &both(), now + Duration::from_secs(1));

        assert!(outcome.is_unchanged());
        assert_eq!(registry.len(), 2);
        assert!(
            registry
                .iter()
                .all(|h| h.next_sample() == now + Duration::from_secs(5))
        );
    }

    #[test]
    fn test_detach_missing_address() {
        let mut bus = bus();
        let mut registry = SensorRegistry::new();
        let now = Instant::now();

        registry.reconcile(&mut bus, &both(), now);
        let outcome = registry.reconcile(
            &mut bus,
            &ScanResult::new([(BME, SensorKind::Bme680)]),
            now,
        );

        assert_eq!(outcome.detached.len(), 1);
        assert_eq!(outcome.detached[0].address, SCD);
        assert!(!registry.contains(SCD));
        assert_eq!(registry.orphaned_kinds(&outcome), vec![SensorKind::Scd4x]);
    }

    #[test]
    fn test_open_failure_is_not_fatal() {
        let mut bus = bus();
        bus.set_present(SCD, false);
        let mut registry = SensorRegistry::new();

        let outcome = registry.reconcile(&mut bus, &both(), Instant::now());

        assert_eq!(outcome.attached.len(), 1);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, SCD);
        assert!(registry.contains(BME));
        assert!(!registry.contains(SCD));
    }

    #[test]
    fn test_kind_change_reopens_handle() {
        let mut bus = bus();
        let mut registry = SensorRegistry::new();
        let now = Instant::now();

        registry.reconcile(&mut bus, &both(), now);
        let outcome = registry.reconcile(
            &mut bus,
            &ScanResult::new([(BME, SensorKind::Bme680), (SCD, SensorKind::Bme680)]),
            now,
        );

        assert_eq!(outcome.detached.len(), 1);
        // The simulated bus refuses to open the wrong kind.
        assert_eq!(outcome.failed.len(), 1);
        assert!(!registry.contains(SCD));
    }

    #[test]
    fn test_close_all_empties_registry() {
        let mut bus = bus();
        let mut registry = SensorRegistry::new();

        registry.reconcile(&mut bus, &both(), Instant::now());
        registry.close_all(&mut bus);

        assert!(registry.is_empty());
        assert!(!registry.has_kind(SensorKind::Bme680));
    }
}
