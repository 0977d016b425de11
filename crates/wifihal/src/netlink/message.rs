//! `nlmsghdr` framing: the header, ACK/error payloads, and batch splitting.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};

/// Round `len` up to the 4-byte netlink message boundary.
#[inline]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + 3) & !3
}

/// Bytes taken by an aligned `nlmsghdr`.
pub const NLMSG_HDRLEN: usize = nlmsg_align(size_of::<NlMsgHdr>());

pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_ACK: u16 = 0x04;

/// Reserved message types below the first family id.
pub struct NlMsgType;

impl NlMsgType {
    pub const ERROR: u16 = 2;
    pub const DONE: u16 = 3;
    pub const MIN_TYPE: u16 = 0x10;
}

/// View the front of `data` as `T`, or report how short it was.
fn prefix<T: FromBytes + KnownLayout + Immutable>(data: &[u8]) -> Result<&T> {
    match T::ref_from_prefix(data) {
        Ok((value, _)) => Ok(value),
        Err(_) => Err(Error::Truncated {
            expected: size_of::<T>(),
            actual: data.len(),
        }),
    }
}

/// `struct nlmsghdr`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgHdr {
    pub nlmsg_len: u32,
    /// Family id for generic netlink.
    pub nlmsg_type: u16,
    pub nlmsg_flags: u16,
    pub nlmsg_seq: u32,
    /// Port id of the sender; zero from the kernel.
    pub nlmsg_pid: u32,
}

impl NlMsgHdr {
    /// A header with no payload yet; `nlmsg_len` covers only itself.
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            nlmsg_len: NLMSG_HDRLEN as u32,
            nlmsg_type: msg_type,
            nlmsg_flags: flags,
            ..Self::default()
        }
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        prefix(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        IntoBytes::as_bytes(self)
    }

    pub fn is_error(&self) -> bool {
        self.nlmsg_type == NlMsgType::ERROR
    }

    pub fn is_done(&self) -> bool {
        self.nlmsg_type == NlMsgType::DONE
    }

    /// NOOP, ERROR, DONE, OVERRUN and the other reserved types.
    pub fn is_control(&self) -> bool {
        self.nlmsg_type < NlMsgType::MIN_TYPE
    }
}

/// Payload of an `NLMSG_ERROR` message. An `error` of zero is an ACK.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlMsgError {
    /// Negative errno, or zero.
    pub error: i32,
    /// Header of the request being answered.
    pub msg: NlMsgHdr,
}

impl NlMsgError {
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        prefix(data)
    }

    pub fn as_bytes(&self) -> &[u8] {
        IntoBytes::as_bytes(self)
    }

    pub fn is_ack(&self) -> bool {
        self.error == 0
    }
}

/// One message out of a received datagram.
#[derive(Debug, Clone, Copy)]
pub struct NlMessage<'a> {
    pub header: &'a NlMsgHdr,
    /// Bytes after the header, up to `nlmsg_len`.
    pub payload: &'a [u8],
    /// The whole message, header included.
    pub raw: &'a [u8],
}

/// Splits a datagram into its netlink messages.
///
/// Trailing bytes shorter than a header are ignored. A header whose
/// length runs past the buffer yields one error and ends the batch.
pub struct MessageIter<'a> {
    rest: &'a [u8],
}

impl<'a> MessageIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { rest: data }
    }

    fn split(&mut self) -> Result<NlMessage<'a>> {
        let header = NlMsgHdr::from_bytes(self.rest)?;
        let len = header.nlmsg_len as usize;
        if !(NLMSG_HDRLEN..=self.rest.len()).contains(&len) {
            return Err(Error::InvalidMessage(format!(
                "nlmsg_len {} with {} bytes left",
                len,
                self.rest.len()
            )));
        }

        let (raw, tail) = self.rest.split_at(len);
        self.rest = tail.get(nlmsg_align(len) - len..).unwrap_or_default();
        Ok(NlMessage {
            header,
            payload: &raw[NLMSG_HDRLEN..],
            raw,
        })
    }
}

impl<'a> Iterator for MessageIter<'a> {
    type Item = Result<NlMessage<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < NLMSG_HDRLEN {
            return None;
        }
        let item = self.split();
        if item.is_err() {
            self.rest = &[];
        }
        Some(item)
    }
}
