//! Async netlink sockets bound to fixed per-process ports.

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::BytesMut;
use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use crate::error::{Error, Result};

/// Bytes reserved for one received datagram.
const RECV_LEN: usize = 32768;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// nl80211 and cld80211.
    Generic,
    /// NETLINK_USERSOCK, the legacy driver diagnostic channel.
    Usersock,
}

/// Fixed local port for `port`: pid in the low 22 bits, `port` above.
pub fn local_port(port: u32) -> u32 {
    (std::process::id() & 0x3F_FFFF) | (port << 22)
}

pub struct NetlinkSocket {
    fd: AsyncFd<Socket>,
    seq: AtomicU32,
    pid: u32,
    protocol: Protocol,
}

impl NetlinkSocket {
    /// Socket with a kernel-assigned port.
    pub fn new(protocol: Protocol) -> Result<Self> {
        Self::bind(protocol, 0)
    }

    /// Socket bound to [`local_port`]`(port)`.
    pub fn with_port(protocol: Protocol, port: u32) -> Result<Self> {
        Self::bind(protocol, local_port(port))
    }

    /// Wrap an already connected socket, reporting `pid` as its port.
    ///
    /// Lets the HAL run over a socketpair in tests.
    pub fn from_socket(socket: Socket, pid: u32, protocol: Protocol) -> Result<Self> {
        Self::wrap(socket, pid, protocol)
    }

    fn bind(protocol: Protocol, port: u32) -> Result<Self> {
        let mut socket = Socket::new(match protocol {
            Protocol::Generic => protocols::NETLINK_GENERIC,
            Protocol::Usersock => protocols::NETLINK_USERSOCK,
        })?;
        let mut addr = SocketAddr::new(port, 0);
        socket.bind(&addr)?;
        socket.get_address(&mut addr)?;
        Self::wrap(socket, addr.port_number(), protocol)
    }

    fn wrap(socket: Socket, pid: u32, protocol: Protocol) -> Result<Self> {
        socket.set_non_blocking(true)?;
        Ok(Self {
            fd: AsyncFd::new(socket)?,
            seq: AtomicU32::new(1),
            pid,
            protocol,
        })
    }

    /// SO_RCVBUF.
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<()> {
        let value = libc::c_int::try_from(size)
            .map_err(|_| Error::InvalidArgs(format!("receive buffer size {} too large", size)))?;
        // SAFETY: `value` is a live c_int and optlen is its size.
        let ret = unsafe {
            libc::setsockopt(
                self.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVBUF,
                (&raw const value).cast(),
                size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if ret < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Local port id.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn add_membership(&mut self, group: u32) -> Result<()> {
        Ok(self.fd.get_mut().add_membership(group)?)
    }

    pub async fn send(&self, msg: &[u8]) -> Result<()> {
        self.io(Interest::WRITABLE, |sock| sock.send(msg, 0))
            .await
            .map(drop)
    }

    /// Receive one datagram. Empty when the peer of a socketpair is gone.
    pub async fn recv_msg(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(RECV_LEN);
        self.io(Interest::READABLE, |sock| sock.recv(&mut buf, 0))
            .await?;
        Ok(buf.to_vec())
    }

    /// Retry `op` until the socket stops reporting `WouldBlock`.
    async fn io<R>(
        &self,
        interest: Interest,
        mut op: impl FnMut(&Socket) -> std::io::Result<R>,
    ) -> Result<R> {
        loop {
            let mut guard = self.fd.ready(interest).await?;
            if let Ok(result) = guard.try_io(|fd| op(fd.get_ref())) {
                return Ok(result?);
            }
        }
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

impl std::fmt::Debug for NetlinkSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetlinkSocket")
            .field("fd", &self.as_raw_fd())
            .field("pid", &self.pid)
            .field("protocol", &self.protocol)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_port_layout() {
        let port = local_port(645);
        assert_eq!(port >> 22, 645);
        assert_eq!(port & 0x3F_FFFF, std::process::id() & 0x3F_FFFF);
    }
}
