//! Common test utilities for integration tests.
//!
//! [`Harness`] wraps a [`FakeHal`] with its event loop running on a
//! background task.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use wifihal::ctrl::CtrlClient;
use wifihal::testing::{FakeHal, temp_path};
use wifihal::{HalConfig, Result, WifiInterface};

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A HAL over fake sockets with a running event loop.
pub struct Harness {
    pub fake: FakeHal,
    event_loop: Option<JoinHandle<Result<()>>>,
}

impl Harness {
    /// HAL with the control socket bound at a fresh temp path.
    pub fn with_ctrl() -> Self {
        Self::start(HalConfig::new().ctrl_socket_path(temp_path("ctrl")))
    }

    /// HAL without a control socket.
    pub fn without_ctrl() -> Self {
        Self::start(HalConfig::new().ctrl_socket(false))
    }

    pub fn start(config: HalConfig) -> Self {
        let fake = FakeHal::new(config).expect("fake HAL");
        let hal = Arc::clone(&fake.hal);
        let event_loop = tokio::spawn(async move { hal.event_loop().await });
        Self {
            fake,
            event_loop: Some(event_loop),
        }
    }

    pub fn iface(&self) -> WifiInterface {
        self.fake
            .hal
            .get_iface_handle("wlan0")
            .expect("wlan0")
            .clone()
    }

    /// A control client bound to a fresh temp path.
    pub fn client(&self) -> CtrlClient {
        let server = self.fake.ctrl_path.as_ref().expect("control socket enabled");
        CtrlClient::bind(server, temp_path("client"))
            .expect("client bind")
            .reply_timeout(TEST_TIMEOUT)
    }

    /// Request cleanup and wait for the event loop to finish. Returns how
    /// many times the cleanup handler ran.
    pub async fn shutdown(mut self) -> usize {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        self.fake.hal.cleanup(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        if let Some(handle) = self.event_loop.take() {
            tokio::time::timeout(TEST_TIMEOUT, handle)
                .await
                .expect("event loop did not stop")
                .expect("event loop panicked")
                .expect("event loop failed");
        }
        calls.load(Ordering::SeqCst)
    }
}

/// Wait for `cond` to hold, polling briefly.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TEST_TIMEOUT;
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
