//! The HAL end of the control socket.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::wire::{CTRL_MAX_MSG, MONSOCK_MAX};
use crate::error::{Error, Result};

/// Bound control socket.
///
/// Peers are addressed by raw `sockaddr_un` bytes, exactly as received, so
/// abstract and unnamed addresses round-trip too.
pub struct CtrlServer {
    fd: AsyncFd<UnixDatagram>,
    path: PathBuf,
}

impl CtrlServer {
    /// Bind to `path` and restrict it to owner and group (0770).
    ///
    /// If the path is taken, a connect probe decides: a live listener makes
    /// this fail, a stale socket file is removed and the bind retried.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let socket = match UnixDatagram::bind(path) {
            Ok(socket) => socket,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                let probe = UnixDatagram::unbound()?;
                if probe.connect(path).is_ok() {
                    tracing::error!(path = %path.display(), "control socket exists and seems to be in use");
                    return Err(Error::Ctrl(format!("{} is in use", path.display())));
                }
                tracing::debug!(path = %path.display(), "removing stale control socket");
                std::fs::remove_file(path)?;
                UnixDatagram::bind(path)?
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o770)) {
            tracing::error!(path = %path.display(), error = %e, "chmod of control socket failed");
            let _ = std::fs::remove_file(path);
            return Err(e.into());
        }

        socket.set_nonblocking(true)?;
        tracing::info!(path = %path.display(), "control socket bound");
        Ok(Self {
            fd: AsyncFd::new(socket)?,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Receive one request and the raw address of its sender.
    pub async fn recv_from(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let mut buf = vec![0u8; CTRL_MAX_MSG];
        loop {
            let mut guard = self.fd.ready(Interest::READABLE).await?;

            match guard.try_io(|inner| recv_from_raw(inner.get_ref().as_raw_fd(), &mut buf)) {
                Ok(result) => {
                    let (n, addr) = result?;
                    buf.truncate(n);
                    return Ok((buf, addr));
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Send one datagram to a raw address without waiting for buffer space.
    ///
    /// A full peer queue fails with `EAGAIN`; callers log it and move on.
    pub fn send_to(&self, addr: &[u8], data: &[u8]) -> Result<()> {
        send_to_raw(self.fd.get_ref().as_raw_fd(), addr, data)?;
        Ok(())
    }

    /// Remove the socket file.
    pub fn unlink(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "unlink control socket");
        }
    }
}

impl std::fmt::Debug for CtrlServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtrlServer")
            .field("fd", &self.fd.get_ref().as_raw_fd())
            .field("path", &self.path)
            .finish()
    }
}

fn recv_from_raw(fd: i32, buf: &mut [u8]) -> io::Result<(usize, Vec<u8>)> {
    // SAFETY: sockaddr_un is plain data; all-zero is a valid value.
    let mut from: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    let mut fromlen = std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
    // SAFETY: buf and from are valid for the lengths passed.
    let n = unsafe {
        libc::recvfrom(
            fd,
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
            0,
            &mut from as *mut libc::sockaddr_un as *mut libc::sockaddr,
            &mut fromlen,
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    let len = (fromlen as usize).min(MONSOCK_MAX);
    // SAFETY: sockaddr_un is MONSOCK_MAX bytes of plain data.
    let raw = unsafe {
        std::slice::from_raw_parts(&from as *const libc::sockaddr_un as *const u8, MONSOCK_MAX)
    };
    Ok((n as usize, raw[..len].to_vec()))
}

fn send_to_raw(fd: i32, addr: &[u8], data: &[u8]) -> io::Result<usize> {
    if addr.len() > MONSOCK_MAX {
        return Err(io::Error::from(io::ErrorKind::InvalidInput));
    }
    // SAFETY: sockaddr_un is plain data; all-zero is a valid value.
    let mut to: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    // SAFETY: `to` is MONSOCK_MAX bytes and addr fits.
    unsafe {
        std::ptr::copy_nonoverlapping(
            addr.as_ptr(),
            &mut to as *mut libc::sockaddr_un as *mut u8,
            addr.len(),
        );
    }
    // SAFETY: data and `to` are valid for the lengths passed.
    let n = unsafe {
        libc::sendto(
            fd,
            data.as_ptr() as *const libc::c_void,
            data.len(),
            libc::MSG_DONTWAIT,
            &to as *const libc::sockaddr_un as *const libc::sockaddr,
            addr.len() as libc::socklen_t,
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Raw `sockaddr_un` bytes for a filesystem path.
pub fn sockaddr_bytes(path: &Path) -> Result<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;

    let name = path.as_os_str().as_bytes();
    let len = 2 + name.len() + 1;
    if len > MONSOCK_MAX {
        return Err(Error::InvalidArgs(format!(
            "socket path {} too long",
            path.display()
        )));
    }
    let mut addr = Vec::with_capacity(len);
    addr.extend_from_slice(&(libc::AF_UNIX as libc::sa_family_t).to_ne_bytes());
    addr.extend_from_slice(name);
    addr.push(0);
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::temp_path;

    #[tokio::test]
    async fn test_recv_and_reply_by_raw_address() {
        let path = temp_path("ctrl");
        let server = CtrlServer::bind(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o770);

        let client_path = temp_path("client");
        let client = UnixDatagram::bind(&client_path).unwrap();
        client.send_to(b"ping", &path).unwrap();

        let (data, from) = server.recv_from().await.unwrap();
        assert_eq!(data, b"ping");
        assert_eq!(from, sockaddr_bytes(&client_path).unwrap());

        server.send_to(&from, b"pong").unwrap();
        let mut buf = [0u8; 16];
        let n = client.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"pong");

        server.unlink();
        assert!(!path.exists());
        std::fs::remove_file(client_path).unwrap();
    }

    #[tokio::test]
    async fn test_stale_path_is_reclaimed() {
        let path = temp_path("ctrl");
        drop(UnixDatagram::bind(&path).unwrap());
        assert!(path.exists());

        let server = CtrlServer::bind(&path);
        assert!(server.is_ok());
        std::fs::remove_file(path).unwrap();
    }

    #[tokio::test]
    async fn test_live_path_is_not_taken() {
        let path = temp_path("ctrl");
        let _live = UnixDatagram::bind(&path).unwrap();

        assert!(CtrlServer::bind(&path).is_err());
        assert!(path.exists());
        std::fs::remove_file(path).unwrap();
    }
}
