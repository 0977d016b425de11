//! Vendor commands against a running HAL.

use std::time::Duration;

use wifihal::command::vendor::VendorCommand;
use wifihal::error::WifiError;
use wifihal::netlink::genl::{CtrlAttr, CtrlAttrMcastGrp, CtrlCmd, GENL_ID_CTRL};
use wifihal::nl80211::qca::{self, attr::concurrency};
use wifihal::registry::HandlerKey;
use wifihal::testing::{FAKE_NL80211_ID, genl_message, vendor_attrs, vendor_message};

use crate::common::{Harness, TEST_TIMEOUT};

#[tokio::test]
async fn test_concurrency_matrix_end_to_end() {
    let h = Harness::without_ctrl();
    let iface = h.iface();

    let kernel = async {
        let req = h.fake.commands.recv().await.unwrap();
        let reply = vendor_message(
            FAKE_NL80211_ID,
            qca::OUI_QCA,
            qca::subcmd::GET_CONCURRENCY_MATRIX,
            |b| {
                b.append_attr_u32(concurrency::RESULTS_SET_SIZE, 2);
                let mut set = 0x3u64.to_ne_bytes().to_vec();
                set.extend_from_slice(&0x5u64.to_ne_bytes());
                b.append_attr(concurrency::RESULTS_SET, &set);
            },
        );
        h.fake.commands.send(&reply).await.unwrap();
        h.fake.commands.ack(&req, 0).await.unwrap();
        req
    };

    let (sets, req) = tokio::join!(h.fake.hal.get_concurrency_matrix(&iface, 4), kernel);
    assert_eq!(sets.unwrap(), vec![0x3, 0x5]);
    assert_eq!(
        vendor_attrs(&req)
            .unwrap()
            .u32(concurrency::CONFIG_PARAM_SET_SIZE_MAX),
        4
    );

    assert_eq!(h.shutdown().await, 1);
}

#[tokio::test]
async fn test_bad_reply_does_not_leak_into_next_command() {
    let h = Harness::without_ctrl();
    let iface = h.iface();

    // Results promised but missing.
    let kernel = async {
        let req = h.fake.commands.recv().await.unwrap();
        let reply = vendor_message(
            FAKE_NL80211_ID,
            qca::OUI_QCA,
            qca::subcmd::GET_CONCURRENCY_MATRIX,
            |b| b.append_attr_u32(concurrency::RESULTS_SET_SIZE, 2),
        );
        h.fake.commands.send(&reply).await.unwrap();
        h.fake.commands.ack(&req, 0).await.unwrap();
    };
    let (sets, ()) = tokio::join!(h.fake.hal.get_concurrency_matrix(&iface, 4), kernel);
    assert!(sets.is_err());

    let (res, _) = tokio::join!(
        h.fake.hal.set_nodfs_flag(&iface, 1),
        h.fake.commands.recv_and_ack(-libc::EBUSY)
    );
    assert_eq!(res.unwrap_err().status(), WifiError::Busy);

    h.shutdown().await;
}

#[tokio::test]
async fn test_nodfs_flag_end_to_end() {
    let h = Harness::without_ctrl();
    let iface = h.iface();

    let (res, req) = tokio::join!(
        h.fake.hal.set_nodfs_flag(&iface, 1),
        h.fake.commands.recv_and_ack(0)
    );
    res.unwrap();
    assert_eq!(
        vendor_attrs(&req.unwrap())
            .unwrap()
            .u32(qca::attr::SET_NO_DFS_FLAG),
        1
    );

    let (res, _) = tokio::join!(
        h.fake.hal.set_nodfs_flag(&iface, 0),
        h.fake.commands.recv_and_ack(-libc::EBUSY)
    );
    assert_eq!(res.unwrap_err().status(), WifiError::Busy);

    h.shutdown().await;
}

#[tokio::test]
async fn test_request_event_completes_through_event_loop() {
    let h = Harness::without_ctrl();
    let key = HandlerKey::vendor(qca::OUI_QCA, qca::subcmd::MONITOR_RSSI);
    let mut cmd = VendorCommand::new(FAKE_NL80211_ID, Some(3), qca::OUI_QCA, qca::subcmd::MONITOR_RSSI);

    let kernel = async {
        h.fake.commands.recv_and_ack(0).await.unwrap();
        let event = vendor_message(FAKE_NL80211_ID, qca::OUI_QCA, qca::subcmd::MONITOR_RSSI, |b| {
            b.append_attr_u32(1, 0xffff_ffc4)
        });
        h.fake.events.send(&event).await.unwrap();
    };

    let (res, ()) = tokio::join!(
        h.fake
            .hal
            .channel()
            .request_event(h.fake.hal.registry(), &mut cmd, key, Some(TEST_TIMEOUT)),
        kernel
    );
    res.unwrap();
    assert!(cmd.vendor_data().is_some());
    assert!(h.fake.hal.registry().is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn test_request_event_deadline() {
    let h = Harness::without_ctrl();
    let key = HandlerKey::vendor(qca::OUI_QCA, qca::subcmd::MONITOR_RSSI);
    let mut cmd = VendorCommand::new(FAKE_NL80211_ID, Some(3), qca::OUI_QCA, qca::subcmd::MONITOR_RSSI);

    let (res, _) = tokio::join!(
        h.fake.hal.channel().request_event(
            h.fake.hal.registry(),
            &mut cmd,
            key,
            Some(Duration::from_millis(30))
        ),
        h.fake.commands.recv_and_ack(0)
    );
    assert_eq!(res.unwrap_err().status(), WifiError::TimedOut);
    assert!(h.fake.hal.registry().is_empty());

    h.shutdown().await;
}

#[tokio::test]
async fn test_multicast_id_lookup() {
    let h = Harness::without_ctrl();

    let kernel = async {
        let req = h.fake.commands.recv().await.unwrap();
        let mut reply = genl_message(GENL_ID_CTRL, CtrlCmd::NewFamily as u8, |b| {
            b.append_attr_u16(CtrlAttr::FamilyId as u16, FAKE_NL80211_ID);
            b.append_attr_str(CtrlAttr::FamilyName as u16, "nl80211");
            let groups = b.nest_start(CtrlAttr::McastGroups as u16);
            let group = b.nest_start(1);
            b.append_attr_str(CtrlAttrMcastGrp::Name as u16, "vendor");
            b.append_attr_u32(CtrlAttrMcastGrp::Id as u16, 9);
            b.nest_end(group);
            b.nest_end(groups);
        });
        // Answer under the request's sequence number.
        reply[8..12].copy_from_slice(&req[8..12]);
        h.fake.commands.send(&reply).await.unwrap();
        h.fake.commands.ack(&req, 0).await.unwrap();
    };

    let (id, ()) = tokio::join!(h.fake.hal.get_multicast_id("nl80211", "vendor"), kernel);
    assert_eq!(id.unwrap(), 9);

    h.shutdown().await;
}
