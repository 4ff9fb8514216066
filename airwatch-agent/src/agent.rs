//! The agent loop.
//!
//! One owner drives every periodic concern from a shared `now`: due sensor
//! samples, bus rediscovery, supervision and the display. Each step is
//! bounded, so the supervisor runs at least once per loop iteration and the
//! watchdog heartbeat is never starved by a slow sensor.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info};

use crate::bus::SensorBus;
use crate::config::AgentConfig;
use crate::display::Display;
use crate::registry::{Reconciliation, SensorRegistry};
use crate::sampler::{SampleReport, Sampler};
use crate::scanner::BusScanner;
use crate::schedule::{self, Periodic};
use crate::status::{RuntimeStatus, SharedState};
use crate::supervisor::{NetworkLink, Supervisor, Watchdog};

/// What one loop iteration did.
#[derive(Debug, Default)]
pub struct StepReport {
    pub samples: SampleReport,
    pub reconciliation: Option<Reconciliation>,
    pub display_refreshed: bool,
}

/// Owns the bus, the registry and every collaborator.
pub struct Agent<B: SensorBus, W, L, D> {
    bus: B,
    scanner: BusScanner,
    registry: SensorRegistry<B>,
    sampler: Sampler,
    supervisor: Supervisor<W, L>,
    display: D,
    display_schedule: Option<Periodic>,
    last_display_update: Option<Instant>,
    state: SharedState,
    loop_delay: Duration,
}

impl<B, W, L, D> Agent<B, W, L, D>
where
    B: SensorBus,
    W: Watchdog,
    L: NetworkLink,
    D: Display,
{
    pub fn new(
        config: &AgentConfig,
        bus: B,
        watchdog: W,
        link: L,
        display: D,
        state: SharedState,
        now: Instant,
    ) -> Self {
        let display_schedule = config
            .display
            .enabled
            .then(|| Periodic::immediate(config.display.update_interval(), now));

        Self {
            bus,
            scanner: BusScanner::new(config.bus.sensors.clone(), config.bus.discovery_period(), now),
            registry: SensorRegistry::new(),
            sampler: Sampler::new(config.bus.sample_interval(), config.bus.read_timeout()),
            supervisor: Supervisor::new(watchdog, link, &config.supervisor, now),
            display,
            display_schedule,
            last_display_update: None,
            state,
            loop_delay: config.agent.loop_delay(),
        }
    }

    /// Run one iteration of every due task.
    pub fn step(&mut self, now: Instant) -> StepReport {
        let store = self.state.store().clone();

        let samples = self
            .sampler
            .run_due(&mut self.registry, &mut self.bus, &store, now);

        let reconciliation = self.scanner.poll(&mut self.bus, now).map(|scan| {
            let outcome = self.registry.reconcile(&mut self.bus, &scan, now);
            for kind in self.registry.orphaned_kinds(&outcome) {
                info!(kind = %kind, "No sensor of this kind attached");
                store.mark_detached(kind);
            }
            outcome
        });

        self.supervisor.step(now);

        let display_refreshed = self
            .display_schedule
            .as_mut()
            .is_some_and(|schedule| schedule.poll(now));
        if display_refreshed {
            self.display
                .render(&store.snapshot(now), self.supervisor.address());
            self.last_display_update = Some(now);
        }

        self.state.publish(RuntimeStatus {
            attached: self.registry.attached(),
            network: self.supervisor.network_status(),
            last_discovery: self.scanner.last_scan(),
            next_discovery: Some(schedule::after(now, self.scanner.next_scan_in(now))),
            last_display_update: self.last_display_update,
        });

        StepReport {
            samples,
            reconciliation,
            display_refreshed,
        }
    }

    /// Drive the loop until `shutdown` turns true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            sensors = self.scanner.table().len(),
            loop_delay_ms = self.loop_delay.as_millis() as u64,
            "Agent loop started"
        );

        loop {
            // Let the HTTP task answer pending scrapes first.
            tokio::task::yield_now().await;

            let report = self.step(Instant::now());
            if report.samples.sampled() > 0 {
                debug!(
                    succeeded = report.samples.succeeded,
                    failed = report.samples.failed,
                    "Sampling pass"
                );
            }

            tokio::select! {
                _ = tokio::time::sleep(self.loop_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown();
    }

    /// Close every sensor handle and disarm the watchdog.
    pub fn shutdown(&mut self) {
        self.registry.close_all(&mut self.bus);
        self.supervisor.shutdown();
        info!("Agent loop stopped");
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn registry(&self) -> &SensorRegistry<B> {
        &self.registry
    }

    pub fn supervisor(&self) -> &Supervisor<W, L> {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut Supervisor<W, L> {
        &mut self.supervisor
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }
}
