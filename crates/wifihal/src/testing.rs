//! Simulated kernel for driving the HAL without netlink access.
//!
//! [`FakeKernel::pair`] returns a [`NetlinkSocket`] backed by one end of a
//! UNIX datagram socketpair and a [`FakeKernel`] holding the other end.
//! Whatever the HAL sends arrives at [`FakeKernel::recv`]; whatever the test
//! sends with [`FakeKernel::send`] is received by the HAL as if it came from
//! the kernel.
//!
//! ```ignore
//! let (socket, kernel) = FakeKernel::pair(100)?;
//! let channel = CommandChannel::new(socket);
//! tokio::spawn(async move {
//!     let req = kernel.recv().await.unwrap();
//!     kernel.ack(&req, 0).await.unwrap();
//! });
//! channel.request_response(&mut cmd).await?;
//! ```

use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use netlink_sys::Socket;
use tokio::net::UnixDatagram;

use crate::config::HalConfig;
use crate::error::Result;
use crate::hal::{HalSockets, WifiHal, WifiInterface};
use crate::netlink::attr::AttrTable;
use crate::netlink::builder::MessageBuilder;
use crate::netlink::genl::{GENL_HDRLEN, GenlMsgHdr};
use crate::netlink::message::{NLMSG_HDRLEN, NlMsgError, NlMsgHdr, NlMsgType};
use crate::netlink::socket::{NetlinkSocket, Protocol};
use crate::nl80211::{
    NL80211_ATTR_VENDOR_DATA, NL80211_ATTR_VENDOR_ID, NL80211_ATTR_VENDOR_SUBCMD,
    NL80211_CMD_VENDOR,
};

/// Family id the fake kernel assigns to nl80211.
pub const FAKE_NL80211_ID: u16 = 0x1c;

/// Family id the fake kernel assigns to cld80211.
pub const FAKE_CLD80211_ID: u16 = 0x1d;

/// The kernel side of a simulated netlink socket.
#[derive(Debug)]
pub struct FakeKernel {
    peer: UnixDatagram,
}

impl FakeKernel {
    /// Create a connected (HAL socket, kernel) pair. `pid` is the port the
    /// HAL socket reports.
    pub fn pair(pid: u32) -> Result<(NetlinkSocket, FakeKernel)> {
        Self::pair_with(pid, Protocol::Generic)
    }

    pub fn pair_with(pid: u32, protocol: Protocol) -> Result<(NetlinkSocket, FakeKernel)> {
        let (local, peer) = std::os::unix::net::UnixDatagram::pair()?;
        // SAFETY: the descriptor was just released by `into_raw_fd` and is
        // owned by the netlink socket from here on.
        let socket = unsafe { Socket::from_raw_fd(local.into_raw_fd()) };
        let socket = NetlinkSocket::from_socket(socket, pid, protocol)?;

        peer.set_nonblocking(true)?;
        let peer = UnixDatagram::from_std(peer)?;
        Ok((socket, FakeKernel { peer }))
    }

    /// Receive the next message written by the HAL.
    pub async fn recv(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; 65536];
        let n = self.peer.recv(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Non-blocking receive; `None` when the HAL has written nothing.
    pub fn try_recv(&self) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; 65536];
        match self.peer.try_recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Some(buf)
            }
            Err(_) => None,
        }
    }

    /// Deliver raw bytes to the HAL.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        self.peer.send(data).await?;
        Ok(())
    }

    /// Answer `request` with `NLMSG_ERROR`; `errno` 0 is an ACK.
    pub async fn ack(&self, request: &[u8], errno: i32) -> Result<()> {
        self.send(&ack_message(request, errno)?).await
    }

    /// Receive the next request and acknowledge it.
    pub async fn recv_and_ack(&self, errno: i32) -> Result<Vec<u8>> {
        let req = self.recv().await?;
        self.ack(&req, errno).await?;
        Ok(req)
    }
}

/// Build an `NLMSG_ERROR` message answering `request`.
pub fn ack_message(request: &[u8], errno: i32) -> Result<Vec<u8>> {
    let original = *NlMsgHdr::from_bytes(request)?;
    let mut builder = MessageBuilder::new(NlMsgType::ERROR, 0);
    builder.set_seq(original.nlmsg_seq);
    builder.set_pid(original.nlmsg_pid);
    builder.append(&NlMsgError {
        error: errno,
        msg: original,
    });
    Ok(builder.finish())
}

/// Build a generic netlink message for `family`/`cmd`; `build` appends the
/// attributes.
pub fn genl_message<F>(family: u16, cmd: u8, build: F) -> Vec<u8>
where
    F: FnOnce(&mut MessageBuilder),
{
    let mut builder = MessageBuilder::new(family, 0);
    builder.append(&GenlMsgHdr::new(cmd, 0));
    build(&mut builder);
    builder.finish()
}

/// Build an `NL80211_CMD_VENDOR` message; `build` appends the attributes
/// nested under `NL80211_ATTR_VENDOR_DATA`.
pub fn vendor_message<F>(family: u16, vendor_id: u32, subcmd: u32, build: F) -> Vec<u8>
where
    F: FnOnce(&mut MessageBuilder),
{
    genl_message(family, NL80211_CMD_VENDOR, |b| {
        b.append_attr_u32(NL80211_ATTR_VENDOR_ID, vendor_id);
        b.append_attr_u32(NL80211_ATTR_VENDOR_SUBCMD, subcmd);
        let nest = b.nest_start(NL80211_ATTR_VENDOR_DATA);
        build(b);
        b.nest_end(nest);
    })
}

/// Generic netlink command of a raw message.
pub fn genl_cmd(msg: &[u8]) -> Option<u8> {
    GenlMsgHdr::from_bytes(msg.get(NLMSG_HDRLEN..)?).map(|h| h.cmd)
}

/// Index the top-level attributes of a raw generic netlink message.
pub fn genl_attrs(msg: &[u8]) -> Result<AttrTable<'_>> {
    let hdr = NlMsgHdr::from_bytes(msg)?;
    let end = (hdr.nlmsg_len as usize).min(msg.len());
    AttrTable::parse(msg.get(NLMSG_HDRLEN + GENL_HDRLEN..end).unwrap_or(&[]))
}

/// Index the attributes nested under `NL80211_ATTR_VENDOR_DATA`.
pub fn vendor_attrs(msg: &[u8]) -> Result<AttrTable<'_>> {
    Ok(genl_attrs(msg)?
        .nested(NL80211_ATTR_VENDOR_DATA)?
        .unwrap_or_else(AttrTable::empty))
}

/// A HAL wired to fake kernel sockets.
#[derive(Debug)]
pub struct FakeHal {
    pub hal: Arc<WifiHal>,
    /// Kernel end of the command socket.
    pub commands: FakeKernel,
    /// Kernel end of the event socket.
    pub events: FakeKernel,
    /// Kernel end of the cld80211 diag socket.
    pub diag: FakeKernel,
    /// Control socket path when the control socket is enabled.
    pub ctrl_path: Option<PathBuf>,
}

impl FakeHal {
    /// Build a HAL over fake sockets with a single `wlan0` interface
    /// (ifindex 3). The control socket is bound when `config` enables it.
    pub fn new(config: HalConfig) -> Result<Self> {
        let (cmd_sock, commands) = FakeKernel::pair(100)?;
        let (event_sock, events) = FakeKernel::pair(101)?;
        let (diag_sock, diag) = FakeKernel::pair(102)?;

        let ctrl_path = config
            .enable_ctrl_socket
            .then(|| config.ctrl_socket_path.clone());
        let sockets = HalSockets {
            command: cmd_sock,
            event: event_sock,
            nl80211_id: FAKE_NL80211_ID,
            cld80211_id: Some(FAKE_CLD80211_ID),
            diag: Some(diag_sock),
        };
        let interfaces = vec![WifiInterface::new(&config.primary_iface, 3)];
        let hal = WifiHal::from_parts(config, sockets, interfaces)?;

        Ok(Self {
            hal,
            commands,
            events,
            diag,
            ctrl_path,
        })
    }
}

/// A unique scratch path under the system temp dir.
pub fn temp_path(tag: &str) -> PathBuf {
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("wifihal-{}-{}-{}", tag, std::process::id(), n))
}
