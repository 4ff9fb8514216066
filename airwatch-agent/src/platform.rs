//! Host implementations of the supervisor collaborators.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::{IpAddr, UdpSocket};
use std::path::PathBuf;

use tracing::{debug, info, trace, warn};

use crate::supervisor::{NetworkError, NetworkLink, Watchdog, WatchdogError};

/// Magic character that stops a Linux watchdog on close.
const MAGIC_CLOSE: &[u8] = b"V";

/// A Linux watchdog device such as `/dev/watchdog`.
///
/// Opening the device starts the timer. Every write resets it.
pub struct DeviceWatchdog {
    path: String,
    file: File,
}

impl DeviceWatchdog {
    pub fn open(path: &str) -> Result<Self, WatchdogError> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|source| WatchdogError::Open {
                path: path.to_string(),
                source,
            })?;
        info!(device = %path, "Watchdog device opened");
        Ok(Self {
            path: path.to_string(),
            file,
        })
    }
}

impl Watchdog for DeviceWatchdog {
    fn feed(&mut self) -> Result<(), WatchdogError> {
        self.file
            .write_all(b"\0")
            .and_then(|()| self.file.flush())
            .map_err(WatchdogError::Feed)
    }

    fn disarm(&mut self) {
        match self.file.write_all(MAGIC_CLOSE) {
            Ok(()) => info!(device = %self.path, "Watchdog disarmed"),
            Err(e) => warn!(device = %self.path, error = %e, "Failed to disarm watchdog"),
        }
    }
}

/// Stand-in used when no watchdog device is configured.
#[derive(Debug, Default)]
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn feed(&mut self) -> Result<(), WatchdogError> {
        trace!("No watchdog device, feed skipped");
        Ok(())
    }
}

/// Watchdog selected from configuration.
pub enum HostWatchdog {
    Device(DeviceWatchdog),
    Noop(NoopWatchdog),
}

impl HostWatchdog {
    pub fn from_config(device: Option<&str>) -> Result<Self, WatchdogError> {
        match device {
            Some(path) => DeviceWatchdog::open(path).map(HostWatchdog::Device),
            None => {
                info!("No watchdog device configured");
                Ok(HostWatchdog::Noop(NoopWatchdog))
            }
        }
    }
}

impl Watchdog for HostWatchdog {
    fn feed(&mut self) -> Result<(), WatchdogError> {
        match self {
            HostWatchdog::Device(w) => w.feed(),
            HostWatchdog::Noop(w) => w.feed(),
        }
    }

    fn disarm(&mut self) {
        match self {
            HostWatchdog::Device(w) => w.disarm(),
            HostWatchdog::Noop(w) => w.disarm(),
        }
    }
}

/// Network link backed by sysfs.
///
/// With no interface configured the link always reports connected.
pub struct SysfsLink {
    interface: Option<String>,
    sysfs_root: PathBuf,
}

impl SysfsLink {
    pub fn new(interface: Option<String>) -> Self {
        Self::with_root(interface, "/sys/class/net")
    }

    pub fn with_root(interface: Option<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            interface,
            sysfs_root: root.into(),
        }
    }

    fn operstate(&self, interface: &str) -> Option<String> {
        let path = self.sysfs_root.join(interface).join("operstate");
        match std::fs::read_to_string(&path) {
            Ok(state) => Some(state.trim().to_string()),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Failed to read operstate");
                None
            }
        }
    }
}

impl NetworkLink for SysfsLink {
    fn is_connected(&mut self) -> bool {
        match &self.interface {
            Some(interface) => self.operstate(interface).is_some_and(|s| s == "up"),
            None => true,
        }
    }

    /// Replace the running process with a fresh copy of itself.
    #[cfg(unix)]
    fn reload_device(&mut self) -> Result<(), NetworkError> {
        use std::os::unix::process::CommandExt;

        let exe = std::env::current_exe().map_err(|e| NetworkError::Reload(e.to_string()))?;
        info!(exe = %exe.display(), "Re-executing agent");

        // exec only returns on failure.
        let err = std::process::Command::new(exe)
            .args(std::env::args_os().skip(1))
            .exec();
        Err(NetworkError::Reload(err.to_string()))
    }

    #[cfg(not(unix))]
    fn reload_device(&mut self) -> Result<(), NetworkError> {
        Err(NetworkError::Unsupported)
    }

    fn address(&self) -> Option<IpAddr> {
        // Connecting a UDP socket sends nothing but selects the outbound address.
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("192.0.2.1:9").ok()?;
        socket.local_addr().ok().map(|addr| addr.ip())
    }
}
