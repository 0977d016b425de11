//! The HAL instance.
//!
//! [`WifiHal::initialize`] opens the netlink sockets, resolves the nl80211
//! and cld80211 families, discovers interfaces and binds the control
//! socket. [`WifiHal::event_loop`] then demultiplexes everything the kernel
//! and control clients send until [`WifiHal::cleanup`] is requested.
//!
//! ```ignore
//! use std::sync::Arc;
//! use wifihal::{HalConfig, WifiHal};
//!
//! let hal = WifiHal::initialize(HalConfig::default()).await?;
//! let runner = Arc::clone(&hal);
//! tokio::spawn(async move { runner.event_loop().await });
//!
//! let iface = hal.get_iface_handle("wlan0")?;
//! let features = hal.get_supported_feature_set(iface).await?;
//!
//! hal.cleanup(|| println!("cleaned up"));
//! ```

mod event_loop;
pub mod iface;
mod ops;

pub use iface::WifiInterface;
pub use ops::{OffloadedPacket, wait_for_driver_ready};

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::command::CommandChannel;
use crate::config::HalConfig;
use crate::ctrl::{CtrlServer, MonitorRegistry};
use crate::error::{Error, Result};
use crate::netlink::genl::{FamilyInfo, query_family};
use crate::netlink::socket::{NetlinkSocket, Protocol};
use crate::nl80211::{
    CLD80211_FAMILY, CLD80211_GROUPS, CLD80211_OEM_GROUP, NL80211_FAMILY, NL80211_GROUPS,
    USERSOCK_DIAG_GROUP,
};
use crate::registry::Registry;

/// Called once when cleanup has finished.
pub type CleanupHandler = Box<dyn FnOnce() + Send>;

/// Receives every raw message read from the diag socket.
pub type DiagHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Lifecycle of a [`WifiHal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalState {
    /// Sockets are open; the event loop is not running.
    Initialized,
    /// The event loop is running.
    Running,
    /// Cleanup has completed.
    CleanedUp,
}

/// Sockets a HAL is assembled from.
#[derive(Debug)]
pub(crate) struct HalSockets {
    pub command: NetlinkSocket,
    pub event: NetlinkSocket,
    pub nl80211_id: u16,
    /// cld80211 family id; `None` when `diag` is a NETLINK_USERSOCK socket.
    pub cld80211_id: Option<u16>,
    pub diag: Option<NetlinkSocket>,
}

struct DiagSocket {
    socket: NetlinkSocket,
    cld80211_id: Option<u16>,
}

/// One HAL instance.
///
/// Shared behind an [`Arc`]: one task runs [`event_loop`](Self::event_loop)
/// while others issue commands.
pub struct WifiHal {
    config: HalConfig,
    nl80211_id: u16,
    channel: CommandChannel,
    event_sock: NetlinkSocket,
    diag: Option<DiagSocket>,
    ctrl: Option<CtrlServer>,
    registry: Registry,
    monitors: Mutex<MonitorRegistry>,
    interfaces: Vec<WifiInterface>,

    supported_features: AtomicU64,
    driver_features: Mutex<Vec<u8>>,
    fw_bus_size: AtomicU32,
    apf_enabled: AtomicBool,

    cleanup_requested: AtomicBool,
    in_event_loop: AtomicBool,
    torn_down: AtomicBool,
    shutdown: Notify,
    cleaned_up: Mutex<Option<CleanupHandler>>,
    diag_handler: Mutex<Option<DiagHandler>>,
}

impl WifiHal {
    /// Open the HAL against the running kernel.
    ///
    /// Fails if nl80211 cannot be resolved or no WiFi interface exists.
    /// A missing cld80211 family, diag socket or control socket only costs
    /// the features that depend on them.
    pub async fn initialize(config: HalConfig) -> Result<Arc<Self>> {
        let command = NetlinkSocket::with_port(Protocol::Generic, config.cmd_port)?;
        let mut event = NetlinkSocket::with_port(Protocol::Generic, config.event_port)?;
        for socket in [&command, &event] {
            if let Err(e) = socket.set_recv_buffer_size(config.socket_buffer_size) {
                tracing::warn!(error = %e, size = config.socket_buffer_size, "could not set receive buffer");
            }
        }

        let nl80211 = query_family(&command, NL80211_FAMILY)
            .await
            .inspect_err(|e| tracing::error!(error = %e, "could not resolve nl80211"))?;
        join_groups(&mut event, &nl80211, NL80211_GROUPS);

        let (diag, cld80211_id) = match open_diag(&config).await {
            Ok(opened) => opened,
            Err(e) => {
                tracing::warn!(error = %e, "diag socket unavailable");
                (None, None)
            }
        };

        let interfaces = iface::discover(&config.sysfs_net_dir, |name| config.is_wifi_iface(name))?;
        if interfaces.is_empty() {
            tracing::error!(dir = %config.sysfs_net_dir.display(), "no wifi interfaces found");
            return Err(Error::Uninitialized);
        }
        if !interfaces.iter().any(|i| i.name() == config.primary_iface) {
            return Err(Error::InterfaceNotFound {
                name: config.primary_iface.clone(),
            });
        }

        let sockets = HalSockets {
            command,
            event,
            nl80211_id: nl80211.id,
            cld80211_id,
            diag,
        };
        let hal = Self::from_parts(config, sockets, interfaces)?;
        hal.query_capabilities().await;
        tracing::info!(
            nl80211 = hal.nl80211_id,
            interfaces = hal.interfaces.len(),
            features = format_args!("{:#x}", hal.supported_features.load(Ordering::Relaxed)),
            "HAL initialized"
        );
        Ok(hal)
    }

    /// Assemble a HAL from already opened sockets.
    pub(crate) fn from_parts(
        config: HalConfig,
        sockets: HalSockets,
        interfaces: Vec<WifiInterface>,
    ) -> Result<Arc<Self>> {
        let ctrl = if config.enable_ctrl_socket {
            match CtrlServer::bind(&config.ctrl_socket_path) {
                Ok(server) => Some(server),
                Err(e) => {
                    tracing::warn!(error = %e, "control socket disabled");
                    None
                }
            }
        } else {
            None
        };

        let cld80211_id = sockets.cld80211_id;
        let diag = sockets.diag.map(|socket| DiagSocket {
            socket,
            cld80211_id,
        });

        Ok(Arc::new(Self {
            nl80211_id: sockets.nl80211_id,
            channel: CommandChannel::new(sockets.command),
            event_sock: sockets.event,
            diag,
            ctrl,
            registry: Registry::new(),
            monitors: Mutex::new(MonitorRegistry::new()),
            interfaces,
            supported_features: AtomicU64::new(0),
            driver_features: Mutex::new(Vec::new()),
            fw_bus_size: AtomicU32::new(config.default_bus_size),
            apf_enabled: AtomicBool::new(false),
            cleanup_requested: AtomicBool::new(false),
            in_event_loop: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
            shutdown: Notify::new(),
            cleaned_up: Mutex::new(None),
            diag_handler: Mutex::new(None),
            config,
        }))
    }

    /// Request cleanup; `handler` runs once teardown has finished.
    ///
    /// With the event loop running, teardown happens when it exits;
    /// otherwise it happens before this returns.
    pub fn cleanup<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.torn_down.load(Ordering::SeqCst) {
            tracing::warn!("cleanup requested on a HAL that is already cleaned up");
            return;
        }
        *lock(&self.cleaned_up) = Some(Box::new(handler));
        self.cleanup_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();

        if !self.in_event_loop.load(Ordering::SeqCst) {
            self.teardown();
        }
    }

    fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(ctrl) = &self.ctrl {
            ctrl.unlink();
        }
        let monitors = self.monitors().clear();
        let leftover = self.registry.clear();
        if leftover > 0 {
            tracing::warn!(leftover, "event handlers still registered at cleanup");
        }
        tracing::info!(monitors, "HAL cleaned up");

        let handler = lock(&self.cleaned_up).take();
        if let Some(handler) = handler {
            handler();
        }
    }

    pub fn state(&self) -> HalState {
        if self.torn_down.load(Ordering::SeqCst) {
            HalState::CleanedUp
        } else if self.in_event_loop.load(Ordering::SeqCst) {
            HalState::Running
        } else {
            HalState::Initialized
        }
    }

    pub fn config(&self) -> &HalConfig {
        &self.config
    }

    /// Event handler registry fed by the event loop.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The command socket.
    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    /// nl80211 family id.
    pub fn nl80211_id(&self) -> u16 {
        self.nl80211_id
    }

    /// cld80211 family id, if the diag socket speaks cld80211.
    pub fn cld80211_id(&self) -> Option<u16> {
        self.diag.as_ref().and_then(|d| d.cld80211_id)
    }

    /// Control socket path, if it is bound.
    pub fn ctrl_path(&self) -> Option<&Path> {
        self.ctrl.as_ref().map(CtrlServer::path)
    }

    /// Interfaces found at initialization.
    pub fn get_ifaces(&self) -> &[WifiInterface] {
        &self.interfaces
    }

    pub fn get_iface_handle(&self, name: &str) -> Result<&WifiInterface> {
        self.interfaces
            .iter()
            .find(|i| i.name() == name)
            .ok_or_else(|| Error::InterfaceNotFound {
                name: name.to_string(),
            })
    }

    /// Number of attached monitor clients.
    pub fn monitor_count(&self) -> usize {
        self.monitors().len()
    }

    /// Install the consumer of diag socket traffic, replacing any previous one.
    pub fn set_diag_handler<F>(&self, handler: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        *lock(&self.diag_handler) = Some(Arc::new(handler));
    }

    pub fn clear_diag_handler(&self) {
        lock(&self.diag_handler).take();
    }

    fn diag_handler(&self) -> Option<DiagHandler> {
        lock(&self.diag_handler).clone()
    }

    fn monitors(&self) -> MutexGuard<'_, MonitorRegistry> {
        lock(&self.monitors)
    }
}

impl std::fmt::Debug for WifiHal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiHal")
            .field("nl80211_id", &self.nl80211_id)
            .field("cld80211_id", &self.cld80211_id())
            .field("interfaces", &self.interfaces)
            .field("ctrl", &self.ctrl)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn join_groups(socket: &mut NetlinkSocket, family: &FamilyInfo, groups: &[&str]) {
    for name in groups {
        match family.mcast_group(name) {
            Some(id) => {
                if let Err(e) = socket.add_membership(id) {
                    tracing::warn!(group = name, error = %e, "could not join multicast group");
                }
            }
            None => tracing::warn!(group = name, "multicast group not offered by kernel"),
        }
    }
}

/// Open the driver diag socket: cld80211 when the kernel has it,
/// NETLINK_USERSOCK otherwise.
async fn open_diag(config: &HalConfig) -> Result<(Option<NetlinkSocket>, Option<u16>)> {
    let mut socket = NetlinkSocket::with_port(Protocol::Generic, config.user_port)?;
    match query_family(&socket, CLD80211_FAMILY).await {
        Ok(cld) => {
            join_groups(&mut socket, &cld, CLD80211_GROUPS);
            if config.enable_ctrl_socket {
                join_groups(&mut socket, &cld, &[CLD80211_OEM_GROUP]);
            }
            tracing::debug!(family = cld.id, "diag socket on cld80211");
            Ok((Some(socket), Some(cld.id)))
        }
        Err(e) if e.is_not_found() => {
            tracing::info!("cld80211 not available, falling back to NETLINK_USERSOCK");
            drop(socket);
            let mut socket = NetlinkSocket::with_port(Protocol::Usersock, config.user_port)?;
            socket.add_membership(USERSOCK_DIAG_GROUP)?;
            if let Err(e) = socket.set_recv_buffer_size(config.socket_buffer_size) {
                tracing::warn!(error = %e, "could not set diag receive buffer");
            }
            Ok((Some(socket), None))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeHal, temp_path};
    use std::sync::atomic::AtomicUsize;

    fn config() -> HalConfig {
        HalConfig::new().ctrl_socket(false)
    }

    #[tokio::test]
    async fn test_from_parts_defaults() {
        let fake = FakeHal::new(config()).unwrap();
        let hal = &fake.hal;
        assert_eq!(hal.state(), HalState::Initialized);
        assert_eq!(hal.nl80211_id(), crate::testing::FAKE_NL80211_ID);
        assert_eq!(hal.cld80211_id(), Some(crate::testing::FAKE_CLD80211_ID));
        assert_eq!(hal.firmware_bus_size(), crate::config::DEFAULT_BUS_SIZE);
        assert!(hal.ctrl_path().is_none());
        assert!(!hal.apf_enabled());
    }

    #[tokio::test]
    async fn test_iface_handle_lookup() {
        let fake = FakeHal::new(config()).unwrap();
        assert_eq!(fake.hal.get_ifaces().len(), 1);
        assert_eq!(fake.hal.get_iface_handle("wlan0").unwrap().index(), 3);
        assert!(fake.hal.get_iface_handle("wlan9").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_cleanup_without_event_loop_runs_handler_once() {
        let fake = FakeHal::new(config()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        fake.hal.cleanup(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fake.hal.state(), HalState::CleanedUp);

        let c = Arc::clone(&calls);
        fake.hal.cleanup(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cleanup_clears_handlers_and_unlinks_ctrl() {
        let path = temp_path("ctrl");
        let fake = FakeHal::new(HalConfig::new().ctrl_socket_path(&path)).unwrap();
        assert_eq!(fake.hal.ctrl_path(), Some(path.as_path()));
        assert!(path.exists());

        fake.hal
            .registry()
            .register(crate::registry::HandlerKey::Command(59), |_| {});
        fake.hal.cleanup(|| {});

        assert!(fake.hal.registry().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_ctrl_bind_failure_is_not_fatal() {
        let path = temp_path("missing-dir").join("ctrl");
        let fake = FakeHal::new(HalConfig::new().ctrl_socket_path(&path)).unwrap();
        assert!(fake.hal.ctrl_path().is_none());
    }
}
