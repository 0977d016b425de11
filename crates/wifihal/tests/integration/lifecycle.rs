//! Event loop start, cleanup and teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use wifihal::command::VendorCommand;
use wifihal::nl80211::qca;
use wifihal::registry::HandlerKey;
use wifihal::testing::{FAKE_NL80211_ID, FakeHal, vendor_message};
use wifihal::{Error, HalConfig, HalState};

use crate::common::{Harness, TEST_TIMEOUT, eventually};

#[tokio::test]
async fn test_cleanup_runs_handler_once() {
    let h = Harness::with_ctrl();
    let hal = Arc::clone(&h.fake.hal);
    let path = h.fake.ctrl_path.clone().unwrap();

    eventually(|| hal.state() == HalState::Running).await;
    assert!(path.exists());

    assert_eq!(h.shutdown().await, 1);
    assert_eq!(hal.state(), HalState::CleanedUp);
    assert!(!path.exists());

    // A second cleanup is ignored.
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    hal.cleanup(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // So is another event loop.
    tokio::time::timeout(TEST_TIMEOUT, hal.event_loop())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hal.state(), HalState::CleanedUp);
}

#[tokio::test]
async fn test_second_event_loop_returns() {
    let h = Harness::without_ctrl();
    let hal = Arc::clone(&h.fake.hal);
    eventually(|| hal.state() == HalState::Running).await;

    tokio::time::timeout(TEST_TIMEOUT, hal.event_loop())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hal.state(), HalState::Running);

    assert_eq!(h.shutdown().await, 1);
}

#[tokio::test]
async fn test_cleanup_without_event_loop() {
    let fake = FakeHal::new(HalConfig::new().ctrl_socket(false)).unwrap();
    assert_eq!(fake.hal.state(), HalState::Initialized);

    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    fake.hal.cleanup(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(fake.hal.state(), HalState::CleanedUp);
}

#[tokio::test]
async fn test_pending_event_wait_fails_on_cleanup() {
    let h = Harness::without_ctrl();
    let hal = Arc::clone(&h.fake.hal);
    let key = HandlerKey::vendor(qca::OUI_QCA, qca::subcmd::MONITOR_RSSI);

    let waiter = tokio::spawn(async move {
        let mut cmd =
            VendorCommand::new(FAKE_NL80211_ID, Some(3), qca::OUI_QCA, qca::subcmd::MONITOR_RSSI);
        hal.channel()
            .request_event(hal.registry(), &mut cmd, key, None)
            .await
    });

    h.fake.commands.recv_and_ack(0).await.unwrap();
    assert_eq!(h.fake.hal.registry().len(), 1);

    assert_eq!(h.shutdown().await, 1);
    let result = tokio::time::timeout(TEST_TIMEOUT, waiter)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::Uninitialized)));
}

#[tokio::test]
async fn test_closed_diag_source_keeps_loop_running() {
    let FakeHal {
        hal,
        commands: _commands,
        events,
        diag,
        ..
    } = FakeHal::new(HalConfig::new().ctrl_socket(false)).unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    hal.registry().register(
        HandlerKey::vendor(qca::OUI_QCA, qca::subcmd::MONITOR_RSSI),
        move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        },
    );

    let runner = Arc::clone(&hal);
    let event_loop = tokio::spawn(async move { runner.event_loop().await });
    drop(diag);

    // Garbage first, then a real event.
    events.send(&[0xde, 0xad]).await.unwrap();
    let event = vendor_message(FAKE_NL80211_ID, qca::OUI_QCA, qca::subcmd::MONITOR_RSSI, |_| {});
    events.send(&event).await.unwrap();
    eventually(|| hits.load(Ordering::SeqCst) == 1).await;
    assert_eq!(hal.state(), HalState::Running);

    hal.cleanup(|| {});
    tokio::time::timeout(TEST_TIMEOUT, event_loop)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(hal.state(), HalState::CleanedUp);
}
