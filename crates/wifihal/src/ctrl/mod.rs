//! UNIX datagram control socket.
//!
//! External processes use it to attach as passive monitors for selected
//! nl80211 frames or cld80211 OEM messages, and to inject a small
//! allow-list of netlink messages. Every request is answered with one
//! [`SyncReply`]; monitors additionally receive events framed by
//! [`EventHeader`].

pub mod client;
pub mod monitor;
pub mod server;
pub mod wire;

pub use client::CtrlClient;
pub use monitor::{MonitorRegistration, MonitorRegistry};
pub use server::CtrlServer;
pub use wire::{CtrlCmd, CtrlFamily, CtrlRequest, CtrlStatus, EventHeader, RequestHeader, SyncReply};
