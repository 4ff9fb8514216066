//! Watchdog heartbeat and network health supervision.
//!
//! Two independent concerns share one step function:
//!
//! - [`WatchdogHeartbeat`] feeds the hardware watchdog on a fixed period. As
//!   long as the agent loop keeps reaching the supervisor step, the device
//!   stays up. A stalled loop stops the feeds and the hardware resets the
//!   device.
//! - [`NetworkMonitor`] tracks link health. A lost link gets a grace window
//!   to re-associate on its own, after which the device is reloaded exactly
//!   once.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use airwatch_common::NetworkStatus;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorConfig;
use crate::schedule::Periodic;

/// Error type for watchdog operations.
#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    #[error("Failed to open watchdog device {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to feed watchdog: {0}")]
    Feed(#[source] std::io::Error),
}

/// Error type for network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Device reload failed: {0}")]
    Reload(String),
    #[error("Device reload is not supported on this platform")]
    Unsupported,
}

/// A hardware timer that resets the device unless fed.
pub trait Watchdog {
    fn feed(&mut self) -> Result<(), WatchdogError>;

    /// Stop the timer on an orderly shutdown.
    fn disarm(&mut self) {}
}

/// The device's network connection.
pub trait NetworkLink {
    fn is_connected(&mut self) -> bool;

    /// Reload the device. On real hardware this does not return on success.
    fn reload_device(&mut self) -> Result<(), NetworkError>;

    /// Current device address, if any.
    fn address(&self) -> Option<IpAddr>;
}

/// Whether the heartbeat is still feeding the watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Armed,
    /// Feeds have stopped so the hardware watchdog restarts the device.
    Released,
}

/// Feeds a [`Watchdog`] once per heartbeat period.
pub struct WatchdogHeartbeat<W> {
    watchdog: W,
    schedule: Periodic,
    state: HeartbeatState,
    feeds: u64,
}

impl<W: Watchdog> WatchdogHeartbeat<W> {
    /// Create a heartbeat whose first feed is due at `now`.
    pub fn new(watchdog: W, period: Duration, now: Instant) -> Self {
        Self {
            watchdog,
            schedule: Periodic::immediate(period, now),
            state: HeartbeatState::Armed,
            feeds: 0,
        }
    }

    /// Feed the watchdog if a feed is due. Returns whether it was fed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.state == HeartbeatState::Released || !self.schedule.poll(now) {
            return false;
        }

        match self.watchdog.feed() {
            Ok(()) => {
                self.feeds += 1;
                debug!(feeds = self.feeds, "Watchdog fed");
                true
            }
            Err(e) => {
                error!(error = %e, "Watchdog feed failed");
                false
            }
        }
    }

    /// Stop feeding for good.
    pub fn release(&mut self) {
        if self.state == HeartbeatState::Armed {
            warn!("Releasing watchdog heartbeat, device will reset");
            self.state = HeartbeatState::Released;
        }
    }

    pub fn disarm(&mut self) {
        self.watchdog.disarm();
    }

    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    pub fn feeds(&self) -> u64 {
        self.feeds
    }

    pub fn last_feed(&self) -> Option<Instant> {
        self.schedule.last_run()
    }

    pub fn watchdog(&self) -> &W {
        &self.watchdog
    }
}

/// Link state as seen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkState {
    Connected,
    Disconnected { since: Instant },
    /// Terminal: a reload has been requested.
    AwaitingReload,
}

impl NetworkState {
    pub fn status(&self) -> NetworkStatus {
        match self {
            NetworkState::Connected => NetworkStatus::Connected,
            NetworkState::Disconnected { .. } => NetworkStatus::Disconnected,
            NetworkState::AwaitingReload => NetworkStatus::AwaitingReload,
        }
    }
}

/// What a link observation changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTransition {
    Unchanged,
    Lost,
    Restored,
    ReloadRequired,
}

/// Connection state machine with a reconnect grace window.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    state: NetworkState,
    grace: Duration,
    schedule: Periodic,
}

impl NetworkMonitor {
    pub fn new(check_interval: Duration, grace: Duration, now: Instant) -> Self {
        Self {
            state: NetworkState::Connected,
            grace,
            schedule: Periodic::immediate(check_interval, now),
        }
    }

    /// Whether a link check is due.
    pub fn poll(&mut self, now: Instant) -> bool {
        self.state != NetworkState::AwaitingReload && self.schedule.poll(now)
    }

    /// Apply one link observation.
    pub fn observe(&mut self, connected: bool, now: Instant) -> NetworkTransition {
        match (self.state, connected) {
            (NetworkState::AwaitingReload, _) => NetworkTransition::Unchanged,
            (NetworkState::Connected, true) => NetworkTransition::Unchanged,
            (NetworkState::Connected, false) => {
                self.state = NetworkState::Disconnected { since: now };
                NetworkTransition::Lost
            }
            (NetworkState::Disconnected { .. }, true) => {
                self.state = NetworkState::Connected;
                NetworkTransition::Restored
            }
            (NetworkState::Disconnected { since }, false) => {
                if now.saturating_duration_since(since) >= self.grace {
                    self.state = NetworkState::AwaitingReload;
                    NetworkTransition::ReloadRequired
                } else {
                    NetworkTransition::Unchanged
                }
            }
        }
    }

    pub fn state(&self) -> NetworkState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == NetworkState::Connected
    }
}

/// Runs the heartbeat and the network monitor from the agent loop.
pub struct Supervisor<W, L> {
    heartbeat: WatchdogHeartbeat<W>,
    monitor: NetworkMonitor,
    link: L,
    reloads: u32,
}

impl<W: Watchdog, L: NetworkLink> Supervisor<W, L> {
    pub fn new(watchdog: W, link: L, config: &SupervisorConfig, now: Instant) -> Self {
        Self {
            heartbeat: WatchdogHeartbeat::new(watchdog, config.heartbeat_period(), now),
            monitor: NetworkMonitor::new(
                config.network_check_interval(),
                config.reconnect_grace(),
                now,
            ),
            link,
            reloads: 0,
        }
    }

    /// Run the network check if due, then the heartbeat.
    pub fn step(&mut self, now: Instant) {
        if self.monitor.poll(now) {
            let connected = self.link.is_connected();
            match self.monitor.observe(connected, now) {
                NetworkTransition::Unchanged => {}
                NetworkTransition::Lost => warn!("Network connection lost"),
                NetworkTransition::Restored => info!("Network connection restored"),
                NetworkTransition::ReloadRequired => self.reload(),
            }
        }

        self.heartbeat.tick(now);
    }

    fn reload(&mut self) {
        self.reloads += 1;
        error!("Network unavailable past the reconnect grace window, reloading device");
        if let Err(e) = self.link.reload_device() {
            error!(error = %e, "Device reload failed");
            self.heartbeat.release();
        }
    }

    pub fn network_status(&self) -> NetworkStatus {
        self.monitor.state().status()
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    pub fn address(&self) -> Option<IpAddr> {
        self.link.address()
    }

    pub fn heartbeat(&self) -> &WatchdogHeartbeat<W> {
        &self.heartbeat
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.monitor
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Number of reloads requested since boot.
    pub fn reloads(&self) -> u32 {
        self.reloads
    }

    /// Disarm the watchdog on orderly shutdown.
    pub fn shutdown(&mut self) {
        self.heartbeat.disarm();
    }
}
