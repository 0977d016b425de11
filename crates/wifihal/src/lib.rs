//! Async WiFi vendor HAL core for QCA drivers.
//!
//! Commands towards the driver are nl80211 vendor commands sent over
//! generic netlink; asynchronous driver events are demultiplexed to
//! registered handlers. An optional UNIX control socket lets other
//! processes monitor selected frames and inject a small set of netlink
//! messages.
//!
//! # Features
//!
//! - `testing` - Fake kernel sockets for driving the HAL in tests
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wifihal::{HalConfig, WifiHal};
//!
//! #[tokio::main]
//! async fn main() -> wifihal::Result<()> {
//!     let hal = WifiHal::initialize(HalConfig::default()).await?;
//!     let runner = Arc::clone(&hal);
//!     let event_loop = tokio::spawn(async move { runner.event_loop().await });
//!
//!     let wlan0 = hal.get_iface_handle("wlan0")?;
//!     let (version, max_len) = hal.get_packet_filter_capabilities(wlan0).await?;
//!     println!("APF v{} with {} bytes", version, max_len);
//!
//!     hal.cleanup(|| {});
//!     let _ = event_loop.await;
//!     Ok(())
//! }
//! ```
//!
//! # Event handlers
//!
//! ```ignore
//! use wifihal::nl80211::qca;
//! use wifihal::registry::HandlerKey;
//!
//! let key = HandlerKey::vendor(qca::OUI_QCA, qca::subcmd::MONITOR_RSSI);
//! hal.registry().register(key, |event| {
//!     println!("rssi event with {} bytes", event.data().len());
//! });
//! ```

pub mod command;
pub mod config;
pub mod ctrl;
pub mod error;
pub mod hal;
pub mod netlink;
pub mod nl80211;
pub mod registry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::HalConfig;
pub use error::{Error, Result, WifiError};
pub use hal::{HalState, OffloadedPacket, WifiHal, WifiInterface};
