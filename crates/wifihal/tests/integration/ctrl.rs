//! Control socket clients against a running HAL.

use wifihal::ctrl::{CtrlCmd, CtrlFamily, CtrlRequest, CtrlStatus, RequestHeader};
use wifihal::netlink::NlMsgHdr;
use wifihal::netlink::message::NLMSG_HDRLEN;
use wifihal::nl80211::{
    IEEE80211_HDR_LEN, NL80211_ATTR_FRAME, NL80211_ATTR_FRAME_MATCH, NL80211_ATTR_FRAME_TYPE,
    NL80211_CMD_FRAME, NL80211_CMD_REGISTER_ACTION, NL80211_CMD_SET_WIPHY, qca,
};
use wifihal::testing::{FAKE_CLD80211_ID, FAKE_NL80211_ID, genl_cmd, genl_message};

use crate::common::{Harness, TEST_TIMEOUT};

const ACTION_MATCH: &[u8] = &[0x04, 0x09];

fn register_action(frame_match: &[u8]) -> Vec<u8> {
    genl_message(FAKE_NL80211_ID, NL80211_CMD_REGISTER_ACTION, |b| {
        b.append_attr_u16(NL80211_ATTR_FRAME_TYPE, 0x00d0);
        b.append_attr(NL80211_ATTR_FRAME_MATCH, frame_match);
    })
}

fn frame_event(body: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; IEEE80211_HDR_LEN];
    frame[0] = 0xd0;
    frame.extend_from_slice(body);
    genl_message(FAKE_NL80211_ID, NL80211_CMD_FRAME, |b| {
        b.append_attr(NL80211_ATTR_FRAME, &frame)
    })
}

fn oem_message(payload: &[u8]) -> Vec<u8> {
    genl_message(FAKE_CLD80211_ID, qca::WLAN_NL_MSG_OEM, |b| b.append_attr(1, payload))
}

#[tokio::test]
async fn test_oversized_monitor_address_rejected() {
    let h = Harness::with_ctrl();
    let mut client = h.client();

    let mut header = RequestHeader::new(CtrlCmd::MonitorAttach, CtrlFamily::Generic as u32, 1);
    header.monsock_len = 200;
    let reply = client.request(&header, &[]).await.unwrap();
    assert_eq!(reply.status, CtrlStatus::InvalidAddress.code());
    assert_eq!(reply.cmd_id, 1);
    assert_eq!(h.fake.hal.monitor_count(), 0);

    h.shutdown().await;
}

#[tokio::test]
async fn test_disallowed_command_never_reaches_kernel() {
    let h = Harness::with_ctrl();
    let mut client = h.client();

    let msg = genl_message(FAKE_NL80211_ID, NL80211_CMD_SET_WIPHY, |_| {});
    let status = client
        .send_nl_data(CtrlFamily::Generic, u32::from(NL80211_CMD_SET_WIPHY), &msg, false)
        .await
        .unwrap();
    assert_eq!(status, CtrlStatus::Failed.code());
    assert!(h.fake.events.try_recv().is_none());

    h.shutdown().await;
}

#[tokio::test]
async fn test_register_action_and_frame_forwarding() {
    let h = Harness::with_ctrl();
    let mut client = h.client();
    let register = register_action(ACTION_MATCH);

    let (status, req) = tokio::join!(
        client.send_nl_data(
            CtrlFamily::Generic,
            u32::from(NL80211_CMD_REGISTER_ACTION),
            &register,
            true
        ),
        h.fake.events.recv_and_ack(0)
    );
    assert_eq!(status.unwrap(), 0);
    let req = req.unwrap();
    assert_eq!(genl_cmd(&req), Some(NL80211_CMD_REGISTER_ACTION));
    let hdr = NlMsgHdr::from_bytes(&req).unwrap();
    assert_eq!(hdr.nlmsg_pid, 101);
    assert_eq!(h.fake.hal.monitor_count(), 1);

    // Not matching: dropped for the client.
    h.fake.events.send(&frame_event(&[0x05, 0x00])).await.unwrap();
    let matching = frame_event(&[0x04, 0x09, 0x01]);
    h.fake.events.send(&matching).await.unwrap();

    let (header, data) = tokio::time::timeout(TEST_TIMEOUT, client.recv_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(header.family, CtrlFamily::Generic as u32);
    assert_eq!(header.cmd_id, u32::from(NL80211_CMD_FRAME));
    assert_eq!(header.data_len as usize, matching.len());
    assert_eq!(data, matching);

    // Same client, overlapping match.
    let status = client
        .attach(
            CtrlFamily::Generic,
            u32::from(NL80211_CMD_REGISTER_ACTION),
            &register_action(&[0x04]),
        )
        .await
        .unwrap();
    assert_eq!(status, CtrlStatus::Conflict.code());

    // Another client cannot take the match either.
    let mut other = h.client();
    let status = other
        .attach(
            CtrlFamily::Generic,
            u32::from(NL80211_CMD_REGISTER_ACTION),
            &register,
        )
        .await
        .unwrap();
    assert_eq!(status, CtrlStatus::Conflict.code());

    let status = client
        .detach(
            CtrlFamily::Generic,
            u32::from(NL80211_CMD_REGISTER_ACTION),
            &register,
        )
        .await
        .unwrap();
    assert_eq!(status, 0);
    assert_eq!(h.fake.hal.monitor_count(), 0);

    h.shutdown().await;
}

#[tokio::test]
async fn test_forwarded_request_kernel_error() {
    let h = Harness::with_ctrl();
    let mut client = h.client();
    let register = register_action(ACTION_MATCH);

    let (status, _) = tokio::join!(
        client.send_nl_data(
            CtrlFamily::Generic,
            u32::from(NL80211_CMD_REGISTER_ACTION),
            &register,
            false
        ),
        h.fake.events.recv_and_ack(-libc::EALREADY)
    );
    assert_eq!(status.unwrap(), CtrlStatus::Failed.code());
    assert_eq!(h.fake.hal.monitor_count(), 0);

    h.shutdown().await;
}

#[tokio::test]
async fn test_oem_messages_forwarded_both_ways() {
    let h = Harness::with_ctrl();
    let mut client = h.client();
    let oem = u32::from(qca::WLAN_NL_MSG_OEM);

    assert_eq!(client.attach(CtrlFamily::Cld80211, oem, &[]).await.unwrap(), 0);
    // Attaching twice for the same command is not a conflict.
    assert_eq!(client.attach(CtrlFamily::Cld80211, oem, &[]).await.unwrap(), 0);
    assert_eq!(h.fake.hal.monitor_count(), 1);

    let from_driver = oem_message(&[0xaa, 0xbb]);
    h.fake.diag.send(&from_driver).await.unwrap();
    let (header, data) = tokio::time::timeout(TEST_TIMEOUT, client.recv_event())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(header.family, CtrlFamily::Cld80211 as u32);
    assert_eq!(header.cmd_id, oem);
    assert_eq!(data, from_driver);

    let to_driver = oem_message(&[0x01]);
    let status = client
        .send_nl_data(CtrlFamily::Cld80211, oem, &to_driver, false)
        .await
        .unwrap();
    assert_eq!(status, 0);
    let sent = h.fake.diag.recv().await.unwrap();
    assert_eq!(
        NlMsgHdr::from_bytes(&sent).unwrap().nlmsg_pid,
        std::process::id()
    );
    assert_eq!(sent[NLMSG_HDRLEN..], to_driver[NLMSG_HDRLEN..]);

    assert_eq!(client.detach(CtrlFamily::Cld80211, oem, &[]).await.unwrap(), 0);
    assert_eq!(
        client.detach(CtrlFamily::Cld80211, oem, &[]).await.unwrap(),
        CtrlStatus::Conflict.code()
    );

    h.shutdown().await;
}

#[tokio::test]
async fn test_truncated_request_answered() {
    let h = Harness::with_ctrl();
    let mut client = h.client();

    let header = RequestHeader::new(CtrlCmd::SendNlData, CtrlFamily::Generic as u32, 7);
    let mut datagram = CtrlRequest::encode(&header, &[0u8; 32]);
    datagram.truncate(datagram.len() - 8);
    client.send(&datagram).await.unwrap();

    // The next sync reply answers the truncated request.
    let reply = client.request(&header, &[]).await.unwrap();
    assert_eq!(reply.cmd_id, 7);
    assert_eq!(reply.status, CtrlStatus::Failed.code());

    h.shutdown().await;
}
