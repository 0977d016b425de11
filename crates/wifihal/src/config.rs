//! HAL configuration.
//!
//! # Example
//!
//! ```ignore
//! use wifihal::HalConfig;
//!
//! let config = HalConfig::new()
//!     .primary_iface("wlan0")
//!     .ctrl_socket(false)
//!     .default_bus_size(2048);
//! ```
//!
//! Loaded from JSON, every field is optional:
//!
//! ```json
//! { "primary_iface": "wlan1", "enable_ctrl_socket": false }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Control socket path used by Android builds.
pub const DEFAULT_CTRL_SOCKET_PATH: &str = "/dev/socket/wifihal/wifihal_ctrlsock";

/// Default firmware bus transfer size when the driver cannot report one.
pub const DEFAULT_BUS_SIZE: u32 = 1520;

/// Runtime configuration for [`WifiHal`](crate::WifiHal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HalConfig {
    /// Path the control socket is bound to.
    pub ctrl_socket_path: PathBuf,
    /// Whether to create the control socket at all.
    pub enable_ctrl_socket: bool,
    /// SO_RCVBUF for the netlink sockets.
    pub socket_buffer_size: usize,
    /// Local port selector of the command socket.
    pub cmd_port: u32,
    /// Local port selector of the event socket.
    pub event_port: u32,
    /// Local port selector of the user/diag socket.
    pub user_port: u32,
    /// Upper bound on an outgoing request, in bytes.
    pub max_message_size: usize,
    /// Interface that must exist for the HAL to start.
    pub primary_iface: String,
    /// Where network interfaces are listed.
    pub sysfs_net_dir: PathBuf,
    /// Name prefixes identifying WiFi interfaces.
    pub iface_prefixes: Vec<String>,
    /// Bus size used when the firmware query fails.
    pub default_bus_size: u32,
    /// Interval between checks for the primary interface, in milliseconds.
    pub driver_ready_poll_ms: u64,
    /// How long to wait for the primary interface, in milliseconds.
    pub driver_ready_timeout_ms: u64,
    /// Optional file written to bring the driver up.
    pub driver_state_ctrl_param: Option<PathBuf>,
    /// Value written to `driver_state_ctrl_param`.
    pub driver_state_on: String,
}

impl Default for HalConfig {
    fn default() -> Self {
        Self {
            ctrl_socket_path: PathBuf::from(DEFAULT_CTRL_SOCKET_PATH),
            enable_ctrl_socket: true,
            socket_buffer_size: 256 * 1024,
            cmd_port: 644,
            event_port: 645,
            user_port: 646,
            max_message_size: crate::command::request::DEFAULT_MAX_MESSAGE_SIZE,
            primary_iface: "wlan0".to_string(),
            sysfs_net_dir: PathBuf::from(crate::hal::iface::DEFAULT_SYSFS_NET),
            iface_prefixes: vec!["wlan".into(), "p2p".into(), "wifi".into()],
            default_bus_size: DEFAULT_BUS_SIZE,
            driver_ready_poll_ms: 100,
            driver_ready_timeout_ms: 10_000,
            driver_state_ctrl_param: None,
            driver_state_on: "ON".to_string(),
        }
    }
}

impl HalConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON file; absent fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn ctrl_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ctrl_socket_path = path.into();
        self
    }

    pub fn ctrl_socket(mut self, enable: bool) -> Self {
        self.enable_ctrl_socket = enable;
        self
    }

    pub fn socket_buffer_size(mut self, size: usize) -> Self {
        self.socket_buffer_size = size;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn primary_iface(mut self, name: impl Into<String>) -> Self {
        self.primary_iface = name.into();
        self
    }

    pub fn sysfs_net_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sysfs_net_dir = dir.into();
        self
    }

    pub fn iface_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.iface_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn default_bus_size(mut self, size: u32) -> Self {
        self.default_bus_size = size;
        self
    }

    /// Poll interval and overall timeout for [`wait_for_driver_ready`].
    ///
    /// [`wait_for_driver_ready`]: crate::hal::wait_for_driver_ready
    pub fn driver_ready(mut self, poll: Duration, timeout: Duration) -> Self {
        self.driver_ready_poll_ms = poll.as_millis() as u64;
        self.driver_ready_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn driver_state_ctrl_param(mut self, path: impl Into<PathBuf>) -> Self {
        self.driver_state_ctrl_param = Some(path.into());
        self
    }

    pub fn driver_ready_poll(&self) -> Duration {
        Duration::from_millis(self.driver_ready_poll_ms)
    }

    pub fn driver_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.driver_ready_timeout_ms)
    }

    /// Check whether `name` looks like a WiFi interface.
    pub fn is_wifi_iface(&self, name: &str) -> bool {
        self.iface_prefixes.iter().any(|p| name.starts_with(p.as_str()))
    }
}
