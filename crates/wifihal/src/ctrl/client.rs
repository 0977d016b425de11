//! Client side of the control socket.
//!
//! ```ignore
//! use wifihal::ctrl::{CtrlClient, CtrlFamily};
//!
//! let mut client = CtrlClient::bind("/dev/socket/wifihal/wifihal_ctrlsock", "/tmp/mon")?;
//! client.attach(CtrlFamily::Cld80211, 0x13, &[]).await?;
//! while let Ok((header, data)) = client.recv_event().await {
//!     println!("cmd {} with {} bytes", header.cmd_id, data.len());
//! }
//! ```

use std::collections::VecDeque;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::server::sockaddr_bytes;
use super::wire::{
    CTRL_MAX_MSG, CtrlCmd, CtrlFamily, CtrlRequest, EventHeader, RequestHeader, SyncReply,
    decode_event,
};
use crate::error::{Error, Result};

/// How long to wait for a sync reply by default.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// A process talking to the HAL over its control socket.
///
/// The client binds its own path so that the HAL can reply and push
/// events to it. Events that arrive while a reply is awaited are queued
/// for [`recv_event`](Self::recv_event).
pub struct CtrlClient {
    fd: AsyncFd<UnixDatagram>,
    server: PathBuf,
    local: PathBuf,
    addr: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
    reply_timeout: Duration,
}

impl CtrlClient {
    /// Bind `local` and address the HAL at `server`.
    pub fn bind(server: impl AsRef<Path>, local: impl AsRef<Path>) -> Result<Self> {
        let local = local.as_ref();
        let addr = sockaddr_bytes(local)?;
        let socket = UnixDatagram::bind(local)?;
        socket.set_nonblocking(true)?;

        Ok(Self {
            fd: AsyncFd::new(socket)?,
            server: server.as_ref().to_path_buf(),
            local: local.to_path_buf(),
            addr,
            pending: VecDeque::new(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        })
    }

    /// Set how long to wait for each sync reply.
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Raw address the HAL sees for this client.
    pub fn addr(&self) -> &[u8] {
        &self.addr
    }

    /// Attach this client as a monitor for (family, cmd_id). `data` carries
    /// the netlink request for `NL80211_CMD_REGISTER_ACTION`.
    pub async fn attach(&mut self, family: CtrlFamily, cmd_id: u32, data: &[u8]) -> Result<i32> {
        let mut header = RequestHeader::new(CtrlCmd::MonitorAttach, family as u32, cmd_id);
        header.set_monsock(&self.addr)?;
        Ok(self.request(&header, data).await?.status)
    }

    /// Undo [`attach`](Self::attach).
    pub async fn detach(&mut self, family: CtrlFamily, cmd_id: u32, data: &[u8]) -> Result<i32> {
        let mut header = RequestHeader::new(CtrlCmd::MonitorDetach, family as u32, cmd_id);
        header.set_monsock(&self.addr)?;
        Ok(self.request(&header, data).await?.status)
    }

    /// Ask the HAL to send `msg` to the kernel, attaching first when
    /// `attach` is set.
    pub async fn send_nl_data(
        &mut self,
        family: CtrlFamily,
        cmd_id: u32,
        msg: &[u8],
        attach: bool,
    ) -> Result<i32> {
        let mut header = RequestHeader::new(CtrlCmd::SendNlData, family as u32, cmd_id);
        if attach {
            header.set_monsock(&self.addr)?;
        }
        Ok(self.request(&header, msg).await?.status)
    }

    /// Send a request and wait for its sync reply.
    pub async fn request(&mut self, header: &RequestHeader, data: &[u8]) -> Result<SyncReply> {
        self.send(&CtrlRequest::encode(header, data)).await?;

        let reply_len = std::mem::size_of::<SyncReply>();
        let timeout = self.reply_timeout;
        let wait = async {
            loop {
                let msg = self.recv_raw().await?;
                if msg.len() == reply_len {
                    return SyncReply::from_bytes(&msg);
                }
                self.pending.push_back(msg);
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(Err(Error::TimedOut))
    }

    /// Send a pre-encoded datagram to the HAL.
    pub async fn send(&self, datagram: &[u8]) -> Result<()> {
        if datagram.len() > CTRL_MAX_MSG {
            return Err(Error::MessageTooLarge {
                size: datagram.len(),
                limit: CTRL_MAX_MSG,
            });
        }
        loop {
            let mut guard = self.fd.ready(Interest::WRITABLE).await?;

            match guard.try_io(|inner| inner.get_ref().send_to(datagram, &self.server)) {
                Ok(result) => {
                    result?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Next event pushed by the HAL.
    pub async fn recv_event(&mut self) -> Result<(EventHeader, Vec<u8>)> {
        let msg = match self.pending.pop_front() {
            Some(msg) => msg,
            None => self.recv_raw().await?,
        };
        let (header, data) = decode_event(&msg)?;
        Ok((header, data.to_vec()))
    }

    async fn recv_raw(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; CTRL_MAX_MSG];
        loop {
            let mut guard = self.fd.ready(Interest::READABLE).await?;

            match guard.try_io(|inner| inner.get_ref().recv(&mut buf)) {
                Ok(result) => {
                    let n = result?;
                    buf.truncate(n);
                    return Ok(buf);
                }
                Err(_would_block) => continue,
            }
        }
    }
}

impl Drop for CtrlClient {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.local);
    }
}

impl std::fmt::Debug for CtrlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtrlClient")
            .field("server", &self.server)
            .field("local", &self.local)
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctrl::server::CtrlServer;
    use crate::ctrl::wire::{CtrlStatus, encode_event};
    use crate::testing::temp_path;

    #[tokio::test]
    async fn test_request_skips_interleaved_events() {
        let server_path = temp_path("ctrl");
        let server = CtrlServer::bind(&server_path).unwrap();
        let mut client = CtrlClient::bind(&server_path, temp_path("client")).unwrap();

        let hal = tokio::spawn(async move {
            let (data, from) = server.recv_from().await.unwrap();
            let req = CtrlRequest::parse(&data).unwrap();
            assert_eq!(req.header.monsock().unwrap(), &from[..]);
            server
                .send_to(&from, &encode_event(CtrlFamily::Cld80211, 0x13, b"oem"))
                .unwrap();
            let reply = SyncReply::for_request(&req.header, CtrlStatus::Success.code());
            server.send_to(&from, reply.as_bytes()).unwrap();
            server.unlink();
        });

        let status = client.attach(CtrlFamily::Cld80211, 0x13, &[]).await.unwrap();
        assert_eq!(status, 0);
        let (header, data) = client.recv_event().await.unwrap();
        assert_eq!(header.cmd_id, 0x13);
        assert_eq!(data, b"oem");
        hal.await.unwrap();
    }

    #[tokio::test]
    async fn test_reply_timeout() {
        let server_path = temp_path("ctrl");
        let server = CtrlServer::bind(&server_path).unwrap();
        let mut client = CtrlClient::bind(&server_path, temp_path("client"))
            .unwrap()
            .reply_timeout(Duration::from_millis(20));

        let err = client
            .detach(CtrlFamily::Generic, 59, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TimedOut));
        server.unlink();
    }
}
