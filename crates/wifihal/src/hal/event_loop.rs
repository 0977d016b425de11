//! Event demultiplexing and control socket requests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{DiagSocket, WifiHal};
use crate::command::event::WifiEvent;
use crate::ctrl::wire::{
    self, CTRL_MAX_MSG, CtrlCmd, CtrlFamily, CtrlRequest, CtrlStatus, SyncReply,
};
use crate::error::{Error, Result};
use crate::netlink::genl::GenlMsgHdr;
use crate::netlink::message::{
    MessageIter, NLM_F_ACK, NLM_F_REQUEST, NLMSG_HDRLEN, NlMsgError, NlMsgHdr,
};
use crate::nl80211::qca::{WLAN_NL_MSG_OEM, subcmd};
use crate::nl80211::{
    NL80211_ATTR_FRAME, NL80211_CMD_FRAME, NL80211_CMD_REGISTER_ACTION, NL80211_CMD_VENDOR,
    cmd_name,
};
use crate::registry::HandlerKey;

/// How long a forwarded SEND_NL_DATA request waits for the kernel's answer.
const NL_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Clears the running flag however the loop exits.
struct Running<'a>(&'a AtomicBool);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl WifiHal {
    /// Run until [`cleanup`](Self::cleanup) is requested.
    ///
    /// Reads the event socket, the diag socket and the control socket.
    /// Only one loop runs at a time; a second call returns immediately.
    /// Teardown happens here before returning, after which the registered
    /// cleanup handler has run.
    pub async fn event_loop(&self) -> Result<()> {
        if self.in_event_loop.swap(true, Ordering::SeqCst) {
            tracing::debug!("event loop already running");
            return Ok(());
        }
        let _running = Running(&self.in_event_loop);
        tracing::info!("event loop started");

        let mut event_open = true;
        let mut diag_open = self.diag.is_some();
        let mut ctrl_open = self.ctrl.is_some();

        while !self.cleanup_requested.load(Ordering::SeqCst) {
            tokio::select! {
                _ = self.shutdown.notified() => {}
                res = self.event_sock.recv_msg(), if event_open => {
                    event_open = self.socket_result("event", res, |data| {
                        self.handle_event_batch(data);
                    });
                }
                res = self.recv_diag(), if diag_open => {
                    diag_open = self.socket_result("diag", res, |data| {
                        self.handle_diag_batch(data);
                    });
                }
                res = self.recv_ctrl(), if ctrl_open => match res {
                    Ok((data, from)) => self.handle_ctrl_request(&data, &from).await,
                    Err(e) => {
                        tracing::error!(error = %e, "control socket receive failed");
                        ctrl_open = false;
                    }
                },
            }
        }

        self.teardown();
        tracing::info!("event loop stopped");
        Ok(())
    }

    /// Hand a received datagram to `handle`; returns whether the source
    /// stays open.
    fn socket_result(&self, name: &str, res: Result<Vec<u8>>, handle: impl FnOnce(&[u8])) -> bool {
        match res {
            Ok(data) if data.is_empty() => {
                tracing::warn!(socket = name, "socket closed");
                false
            }
            Ok(data) => {
                handle(&data);
                true
            }
            Err(e) if e.errno() == Some(libc::ENOBUFS) => {
                tracing::warn!(socket = name, "receive buffer overrun, events lost");
                true
            }
            Err(e) => {
                tracing::error!(socket = name, error = %e, "receive failed");
                false
            }
        }
    }

    async fn recv_diag(&self) -> Result<Vec<u8>> {
        match &self.diag {
            Some(diag) => diag.socket.recv_msg().await,
            None => std::future::pending().await,
        }
    }

    async fn recv_ctrl(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        match &self.ctrl {
            Some(ctrl) => ctrl.recv_from().await,
            None => std::future::pending().await,
        }
    }

    /// Process every message of an event socket datagram.
    ///
    /// Returns the status of the last `NLMSG_ERROR` seen, if any.
    pub(crate) fn handle_event_batch(&self, data: &[u8]) -> Option<i32> {
        let mut status = None;
        for msg in MessageIter::new(data) {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed event datagram");
                    break;
                }
            };

            if msg.header.is_error() {
                match NlMsgError::from_bytes(msg.payload) {
                    Ok(err) => {
                        if !err.is_ack() {
                            tracing::debug!(errno = err.error, "error on event socket");
                        }
                        status = Some(err.error);
                    }
                    Err(e) => tracing::warn!(error = %e, "short NLMSG_ERROR"),
                }
                continue;
            }
            if msg.header.is_done() || msg.header.is_control() {
                continue;
            }
            self.handle_event(msg.raw);
        }
        status
    }

    fn handle_event(&self, raw: &[u8]) {
        let mut event = WifiEvent::new(raw);
        if let Err(e) = event.parse() {
            tracing::error!(error = %e, "could not parse event");
            return;
        }

        let cmd = event.cmd();
        if cmd == NL80211_CMD_VENDOR {
            if event.vendor_subcmd() != subcmd::GSCAN_FULL_SCAN_RESULT {
                tracing::debug!(
                    vendor_id = format_args!("{:#x}", event.vendor_id()),
                    subcmd = event.vendor_subcmd(),
                    "vendor event"
                );
            }
        } else {
            tracing::trace!(cmd = cmd_name(cmd), "event");
            if cmd == NL80211_CMD_FRAME && self.ctrl.is_some() {
                self.forward_frame(&event);
            }
        }

        if !self.registry.dispatch(&event) {
            tracing::trace!(key = ?HandlerKey::for_event(&event), "no handler for event");
        }
    }

    /// Push a received management frame to every monitor whose match
    /// prefixes its body.
    fn forward_frame(&self, event: &WifiEvent<'_>) {
        let Some(frame) = event.get_attribute(NL80211_ATTR_FRAME) else {
            tracing::debug!("FRAME event without frame body");
            return;
        };
        let targets = self.monitors().frame_targets(frame);
        if targets.is_empty() {
            return;
        }
        let msg = wire::encode_event(CtrlFamily::Generic, u32::from(NL80211_CMD_FRAME), event.data());
        self.push_to_monitors(&targets, &msg);
    }

    fn push_to_monitors(&self, targets: &[Vec<u8>], msg: &[u8]) {
        let Some(ctrl) = &self.ctrl else {
            return;
        };
        for addr in targets {
            if let Err(e) = ctrl.send_to(addr, msg) {
                tracing::error!(error = %e, "could not send event to monitor");
            }
        }
    }

    fn handle_diag_batch(&self, data: &[u8]) {
        let Some(diag) = &self.diag else {
            return;
        };
        let handler = self.diag_handler();

        for msg in MessageIter::new(data) {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed diag datagram");
                    break;
                }
            };
            if msg.header.is_control() {
                continue;
            }

            if self.is_oem_message(diag, msg.header, msg.payload) {
                let targets = self
                    .monitors()
                    .command_targets(CtrlFamily::Cld80211, u32::from(WLAN_NL_MSG_OEM));
                if !targets.is_empty() {
                    let event = wire::encode_event(
                        CtrlFamily::Cld80211,
                        u32::from(WLAN_NL_MSG_OEM),
                        msg.raw,
                    );
                    self.push_to_monitors(&targets, &event);
                }
            }

            if let Some(handler) = &handler {
                handler(msg.raw);
            }
        }
    }

    fn is_oem_message(&self, diag: &DiagSocket, header: &NlMsgHdr, payload: &[u8]) -> bool {
        self.ctrl.is_some()
            && diag.cld80211_id == Some(header.nlmsg_type)
            && GenlMsgHdr::from_bytes(payload).is_some_and(|g| g.cmd == WLAN_NL_MSG_OEM)
    }

    /// Answer one control socket request.
    pub(crate) async fn handle_ctrl_request(&self, buf: &[u8], from: &[u8]) {
        let (header, status) = match CtrlRequest::parse(buf) {
            Ok(req) => {
                let status = self.ctrl_status(&req).await;
                (req.header, status)
            }
            Err(e) => {
                tracing::warn!(error = %e, len = buf.len(), "malformed control request");
                (wire::header_lossy(buf), CtrlStatus::Failed.code())
            }
        };

        let Some(ctrl) = &self.ctrl else {
            return;
        };
        let reply = SyncReply::for_request(&header, status);
        if let Err(e) = ctrl.send_to(from, reply.as_bytes()) {
            tracing::error!(error = %e, "could not answer control request");
        }
    }

    async fn ctrl_status(&self, req: &CtrlRequest<'_>) -> i32 {
        let header = &req.header;
        tracing::debug!(
            ctrl_cmd = header.ctrl_cmd,
            family = header.family,
            cmd_id = header.cmd_id,
            "control request"
        );

        let status = match req.cmd() {
            Some(CtrlCmd::SendNlData) => self.send_nl_data(req).await,
            Some(cmd) => self.update_monitors(cmd, req),
            None => {
                tracing::warn!(ctrl_cmd = header.ctrl_cmd, "unknown control command");
                CtrlStatus::Failed
            }
        };
        status.code()
    }

    fn update_monitors(&self, cmd: CtrlCmd, req: &CtrlRequest<'_>) -> CtrlStatus {
        let mut monitors = self.monitors();
        let status = match cmd {
            CtrlCmd::MonitorDetach => monitors.detach(&req.header, req.data),
            _ => monitors.attach(&req.header, req.data),
        };
        tracing::debug!(?status, monitors = monitors.len(), "monitor registrations updated");
        status
    }

    /// Forward an allow-listed netlink message from a control client.
    async fn send_nl_data(&self, req: &CtrlRequest<'_>) -> CtrlStatus {
        let header = &req.header;
        if header.monsock_len != 0 {
            let status = self.monitors().attach(header, req.data);
            if status != CtrlStatus::Success {
                return status;
            }
        }

        if header.data_len as usize > CTRL_MAX_MSG {
            tracing::warn!(len = header.data_len, "netlink payload too large");
            return CtrlStatus::Failed;
        }
        let (nlh, cmd) = match wire::embedded_genl(req.data) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(error = %e, "bad netlink payload");
                return CtrlStatus::Failed;
            }
        };
        let msg = &req.data[..nlh.nlmsg_len as usize];

        match req.family() {
            Some(CtrlFamily::Generic)
                if cmd == NL80211_CMD_FRAME || cmd == NL80211_CMD_REGISTER_ACTION =>
            {
                match self.forward_nl80211(msg, nlh).await {
                    Ok(()) => CtrlStatus::Success,
                    Err(e) => {
                        tracing::warn!(cmd = cmd_name(cmd), error = %e, "forwarded request failed");
                        CtrlStatus::Failed
                    }
                }
            }
            Some(CtrlFamily::Cld80211) if cmd == WLAN_NL_MSG_OEM => {
                match self.forward_cld80211(msg, nlh).await {
                    Ok(()) => CtrlStatus::Success,
                    Err(e) => {
                        tracing::warn!(error = %e, "forwarding OEM message failed");
                        CtrlStatus::Failed
                    }
                }
            }
            family => {
                tracing::warn!(?family, cmd, "netlink command not allowed");
                CtrlStatus::Failed
            }
        }
    }

    /// Send on the event socket and wait for the kernel's ACK there.
    async fn forward_nl80211(&self, msg: &[u8], mut nlh: NlMsgHdr) -> Result<()> {
        nlh.nlmsg_flags |= NLM_F_REQUEST | NLM_F_ACK;
        nlh.nlmsg_seq = self.event_sock.next_seq();
        nlh.nlmsg_pid = self.event_sock.pid();
        self.event_sock.send(&with_header(msg, &nlh)).await?;

        let wait = async {
            loop {
                let data = self.event_sock.recv_msg().await?;
                if data.is_empty() {
                    return Err(Error::Ctrl("event socket closed".into()));
                }
                if let Some(status) = self.handle_event_batch(&data) {
                    return Ok(status);
                }
            }
        };
        match tokio::time::timeout(NL_REPLY_TIMEOUT, wait).await {
            Ok(Ok(0)) => Ok(()),
            Ok(Ok(errno)) => Err(Error::from_errno(errno)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::TimedOut),
        }
    }

    /// Send an OEM message on the cld80211 socket as this process.
    async fn forward_cld80211(&self, msg: &[u8], mut nlh: NlMsgHdr) -> Result<()> {
        let diag = self
            .diag
            .as_ref()
            .filter(|d| d.cld80211_id.is_some())
            .ok_or_else(|| Error::Ctrl("cld80211 socket not available".into()))?;
        nlh.nlmsg_pid = std::process::id();
        diag.socket.send(&with_header(msg, &nlh)).await
    }
}

fn with_header(msg: &[u8], nlh: &NlMsgHdr) -> Vec<u8> {
    let mut out = msg.to_vec();
    out[..NLMSG_HDRLEN].copy_from_slice(nlh.as_bytes());
    out
}
