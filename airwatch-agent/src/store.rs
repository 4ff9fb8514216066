//! Per-kind metrics store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use airwatch_common::{Reading, SensorKind, SensorLiveness, SensorStatus};
use parking_lot::RwLock;
use tracing::trace;

/// Consecutive failures after which a kind is reported offline.
const OFFLINE_AFTER_FAILURES: u32 = 3;

/// Result of one sample attempt.
#[derive(Debug, Clone)]
pub enum SampleOutcome {
    /// The sensor returned a reading.
    Success(Reading),
    /// The read failed or timed out.
    Failure(String),
}

/// Latest known state of one sensor kind.
#[derive(Debug, Clone)]
pub struct MetricsEntry {
    kind: SensorKind,
    last_reading: Option<Arc<Reading>>,
    is_error: bool,
    last_error: Option<String>,
    attached: bool,
    first_attempt: Instant,
    last_attempt: Instant,
    last_success: Option<Instant>,
    successes: u64,
    failures: u64,
    consecutive_failures: u32,
}

impl MetricsEntry {
    fn new(kind: SensorKind, now: Instant) -> Self {
        Self {
            kind,
            last_reading: None,
            is_error: false,
            last_error: None,
            attached: true,
            first_attempt: now,
            last_attempt: now,
            last_success: None,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
        }
    }

    fn apply(&mut self, outcome: SampleOutcome, now: Instant) {
        self.attached = true;
        self.last_attempt = now;

        match outcome {
            SampleOutcome::Success(reading) => {
                self.last_reading = Some(Arc::new(reading));
                self.is_error = false;
                self.last_error = None;
                self.last_success = Some(now);
                self.successes += 1;
                self.consecutive_failures = 0;
            }
            SampleOutcome::Failure(error) => {
                self.is_error = true;
                self.last_error = Some(error);
                self.failures += 1;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            }
        }
    }

    /// Time since the last successful sample, or since the first attempt if
    /// the kind never produced one.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_success.unwrap_or(self.first_attempt))
    }

    pub fn status(&self) -> SensorStatus {
        if !self.attached {
            SensorStatus::Offline
        } else if !self.is_error {
            SensorStatus::Online
        } else if self.consecutive_failures >= OFFLINE_AFTER_FAILURES {
            SensorStatus::Offline
        } else {
            SensorStatus::Degraded
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn last_reading(&self) -> Option<&Arc<Reading>> {
        self.last_reading.as_ref()
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn last_attempt(&self) -> Instant {
        self.last_attempt
    }
}

/// A frozen copy of one entry, with its age resolved at snapshot time.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub kind: SensorKind,
    pub reading: Option<Arc<Reading>>,
    pub is_error: bool,
    pub age: Duration,
    pub status: SensorStatus,
    pub attached: bool,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl EntrySnapshot {
    fn capture(entry: &MetricsEntry, now: Instant) -> Self {
        Self {
            kind: entry.kind,
            reading: entry.last_reading.clone(),
            is_error: entry.is_error,
            age: entry.age(now),
            status: entry.status(),
            attached: entry.attached,
            successes: entry.successes,
            failures: entry.failures,
            consecutive_failures: entry.consecutive_failures,
            last_error: entry.last_error.clone(),
        }
    }

    /// Liveness document for the status endpoint.
    pub fn liveness(&self) -> SensorLiveness {
        SensorLiveness {
            kind: self.kind,
            status: self.status,
            age_secs: self.age.as_secs_f64(),
            successes: self.successes,
            failures: self.failures,
            consecutive_failures: self.consecutive_failures,
            last_error: self.last_error.clone(),
        }
    }
}

/// Point-in-time copy of every entry seen since boot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    entries: Vec<EntrySnapshot>,
    taken_at: Instant,
}

impl Snapshot {
    /// Entries in `SensorKind` order.
    pub fn entries(&self) -> &[EntrySnapshot] {
        &self.entries
    }

    pub fn get(&self, kind: SensorKind) -> Option<&EntrySnapshot> {
        self.entries.iter().find(|e| e.kind == kind)
    }

    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Holds one [`MetricsEntry`] per sensor kind.
///
/// Every entry sits behind its own lock and readings are shared immutably,
/// so a snapshot taken while the sampler writes never observes a reading
/// whose fields come from two captures. Entries are created on first use
/// and never removed.
pub struct MetricsStore {
    entries: [RwLock<Option<MetricsEntry>>; SensorKind::COUNT],
}

impl MetricsStore {
    pub fn new() -> Self {
        Self {
            entries: std::array::from_fn(|_| RwLock::new(None)),
        }
    }

    fn slot(&self, kind: SensorKind) -> &RwLock<Option<MetricsEntry>> {
        &self.entries[kind.index()]
    }

    /// Record the outcome of a sample attempt for `kind`.
    pub fn update(&self, kind: SensorKind, outcome: SampleOutcome, now: Instant) {
        let mut slot = self.slot(kind).write();
        let entry = slot.get_or_insert_with(|| MetricsEntry::new(kind, now));
        entry.apply(outcome, now);
        trace!(
            kind = %kind,
            is_error = entry.is_error,
            successes = entry.successes,
            failures = entry.failures,
            "Metrics entry updated"
        );
    }

    /// Flag `kind` as erroring because no sensor of that kind is attached.
    ///
    /// The last reading and the age reference are kept, so the entry keeps
    /// ageing until the kind reattaches and samples successfully.
    pub fn mark_detached(&self, kind: SensorKind) {
        if let Some(entry) = self.slot(kind).write().as_mut() {
            entry.attached = false;
            entry.is_error = true;
            entry.last_error = Some("sensor detached".to_string());
        }
    }

    /// Copy of the entry for `kind`, if it has ever been sampled.
    pub fn entry(&self, kind: SensorKind) -> Option<MetricsEntry> {
        self.slot(kind).read().clone()
    }

    /// Consistent copy of every entry.
    pub fn snapshot(&self, now: Instant) -> Snapshot {
        let entries = SensorKind::ALL
            .iter()
            .filter_map(|kind| {
                self.slot(*kind)
                    .read()
                    .as_ref()
                    .map(|entry| EntrySnapshot::capture(entry, now))
            })
            .collect();

        Snapshot {
            entries,
            taken_at: now,
        }
    }

    /// Whether any kind has produced at least one successful sample.
    pub fn has_samples(&self) -> bool {
        self.entries
            .iter()
            .any(|slot| slot.read().as_ref().is_some_and(|e| e.successes > 0))
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a shareable store handle.
pub type SharedStore = Arc<MetricsStore>;
