//! Control socket datagram layouts.
//!
//! All structures are native endian with C (LP64) layout so that clients
//! written against the C headers interoperate.

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};
use crate::netlink::genl::{GENL_HDRLEN, GenlMsgHdr};
use crate::netlink::message::{NLMSG_HDRLEN, NlMsgHdr};

/// Largest control datagram in either direction.
pub const CTRL_MAX_MSG: usize = 4096;

/// Size of `struct sockaddr_un`.
pub const MONSOCK_MAX: usize = 110;

/// Size of the request header.
pub const REQUEST_HDRLEN: usize = std::mem::size_of::<RequestHeader>();

/// Largest netlink message a request may carry.
pub const MAX_NL_DATA: usize = CTRL_MAX_MSG - REQUEST_HDRLEN;

/// Control commands.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlCmd {
    MonitorAttach = 0,
    MonitorDetach = 1,
    SendNlData = 2,
}

impl CtrlCmd {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::MonitorAttach),
            1 => Some(Self::MonitorDetach),
            2 => Some(Self::SendNlData),
            _ => None,
        }
    }
}

/// Netlink families a request can address.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CtrlFamily {
    /// nl80211 over generic netlink.
    Generic = 1,
    /// The cld80211 driver family.
    Cld80211 = 2,
}

impl CtrlFamily {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Generic),
            2 => Some(Self::Cld80211),
            _ => None,
        }
    }
}

/// Status carried in a sync reply.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlStatus {
    Success = 0,
    /// Malformed or disallowed request, or a failed send.
    Failed = -1,
    /// Registration conflict, or detaching an unknown registration.
    Conflict = -2,
    /// Monitor address longer than `struct sockaddr_un`.
    InvalidAddress = -3,
}

impl CtrlStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// `wifihal_ctrl_req_t` without its trailing data.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RequestHeader {
    pub ctrl_cmd: u32,
    pub family: u32,
    pub cmd_id: u32,
    _pad0: u32,
    pub monsock_len: u64,
    pub monsock: [u8; MONSOCK_MAX],
    _pad1: [u8; 2],
    pub data_len: u64,
    pub reserved: [u32; 4],
}

impl RequestHeader {
    pub fn new(ctrl_cmd: CtrlCmd, family: u32, cmd_id: u32) -> Self {
        let mut hdr = Self::new_zeroed();
        hdr.ctrl_cmd = ctrl_cmd as u32;
        hdr.family = family;
        hdr.cmd_id = cmd_id;
        hdr
    }

    /// Set the monitor address. Fails if it does not fit a `sockaddr_un`.
    pub fn set_monsock(&mut self, addr: &[u8]) -> Result<()> {
        if addr.len() > MONSOCK_MAX {
            return Err(Error::InvalidArgs(format!(
                "monitor address of {} bytes",
                addr.len()
            )));
        }
        self.monsock = [0; MONSOCK_MAX];
        self.monsock[..addr.len()].copy_from_slice(addr);
        self.monsock_len = addr.len() as u64;
        Ok(())
    }

    /// The monitor address, if `monsock_len` is in range.
    pub fn monsock(&self) -> Option<&[u8]> {
        let len = usize::try_from(self.monsock_len).ok()?;
        self.monsock.get(..len)
    }

    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}

/// A received control request.
#[derive(Debug, Clone, Copy)]
pub struct CtrlRequest<'a> {
    pub header: RequestHeader,
    pub data: &'a [u8],
}

impl<'a> CtrlRequest<'a> {
    /// Decode a datagram.
    ///
    /// A short datagram is an error, but its header is still recovered
    /// zero-padded through [`header_lossy`] so a reply can echo it.
    pub fn parse(buf: &'a [u8]) -> Result<Self> {
        let (header, rest) =
            RequestHeader::read_from_prefix(buf).map_err(|_| Error::Truncated {
                expected: REQUEST_HDRLEN,
                actual: buf.len(),
            })?;
        let len = usize::try_from(header.data_len).unwrap_or(usize::MAX);
        let data = rest.get(..len).ok_or(Error::Truncated {
            expected: REQUEST_HDRLEN.saturating_add(len),
            actual: buf.len(),
        })?;
        Ok(Self { header, data })
    }

    pub fn cmd(&self) -> Option<CtrlCmd> {
        CtrlCmd::from_u32(self.header.ctrl_cmd)
    }

    pub fn family(&self) -> Option<CtrlFamily> {
        CtrlFamily::from_u32(self.header.family)
    }

    /// Encode a request with `data` appended.
    pub fn encode(header: &RequestHeader, data: &[u8]) -> Vec<u8> {
        let mut header = *header;
        header.data_len = data.len() as u64;
        let mut buf = Vec::with_capacity(REQUEST_HDRLEN + data.len());
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(data);
        buf
    }
}

/// Recover whatever header fields a datagram carries, zero-filling the rest.
pub fn header_lossy(buf: &[u8]) -> RequestHeader {
    let mut header = RequestHeader::new_zeroed();
    let n = buf.len().min(REQUEST_HDRLEN);
    header.as_mut_bytes()[..n].copy_from_slice(&buf[..n]);
    header
}

/// `wifihal_ctrl_sync_rsp_t`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SyncReply {
    pub ctrl_cmd: u32,
    pub family: u32,
    pub cmd_id: u32,
    pub status: i32,
}

impl SyncReply {
    /// Reply to `req` with `status`.
    pub fn for_request(req: &RequestHeader, status: i32) -> Self {
        Self {
            ctrl_cmd: req.ctrl_cmd,
            family: req.family,
            cmd_id: req.cmd_id,
            status,
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        Self::read_from_bytes(buf).map_err(|_| Error::Truncated {
            expected: std::mem::size_of::<Self>(),
            actual: buf.len(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}

/// `wifihal_ctrl_event_t` without its trailing data.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct EventHeader {
    pub family: u32,
    pub cmd_id: u32,
    pub data_len: u64,
    pub reserved: [u32; 4],
}

/// Size of the event header.
pub const EVENT_HDRLEN: usize = std::mem::size_of::<EventHeader>();

/// Encode an event pushed to monitors.
pub fn encode_event(family: CtrlFamily, cmd_id: u32, data: &[u8]) -> Vec<u8> {
    let header = EventHeader {
        family: family as u32,
        cmd_id,
        data_len: data.len() as u64,
        reserved: [0; 4],
    };
    let mut buf = Vec::with_capacity(EVENT_HDRLEN + data.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(data);
    buf
}

/// Decode an event into its header and data.
pub fn decode_event(buf: &[u8]) -> Result<(EventHeader, &[u8])> {
    let (header, rest) = EventHeader::read_from_prefix(buf).map_err(|_| Error::Truncated {
        expected: EVENT_HDRLEN,
        actual: buf.len(),
    })?;
    let len = usize::try_from(header.data_len).unwrap_or(usize::MAX);
    let data = rest.get(..len).ok_or(Error::Truncated {
        expected: EVENT_HDRLEN.saturating_add(len),
        actual: buf.len(),
    })?;
    Ok((header, data))
}

/// Netlink header and generic netlink command of an embedded message.
///
/// Requires a complete header pair and `nlmsg_len` within both the buffer
/// and [`MAX_NL_DATA`].
pub fn embedded_genl(data: &[u8]) -> Result<(NlMsgHdr, u8)> {
    let hdr = *NlMsgHdr::from_bytes(data)?;
    let len = hdr.nlmsg_len as usize;
    if len > MAX_NL_DATA {
        return Err(Error::MessageTooLarge {
            size: len,
            limit: MAX_NL_DATA,
        });
    }
    if len < NLMSG_HDRLEN + GENL_HDRLEN || len > data.len() {
        return Err(Error::InvalidMessage(format!(
            "embedded netlink length {} with {} bytes",
            len,
            data.len()
        )));
    }
    let genl = GenlMsgHdr::from_bytes(&data[NLMSG_HDRLEN..len])
        .ok_or_else(|| Error::InvalidMessage("GENL header too short".into()))?;
    Ok((hdr, genl.cmd))
}

impl EventHeader {
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }
}
