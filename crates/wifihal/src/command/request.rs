//! Outgoing generic netlink request.

use crate::error::{Error, Result};
use crate::hal::iface;
use crate::netlink::attr::{NLA_HDRLEN, nla_align};
use crate::netlink::builder::{MessageBuilder, NestToken};
use crate::netlink::genl::GenlMsgHdr;
use crate::nl80211::NL80211_ATTR_IFINDEX;

/// Default request size limit (one page, the libnl default).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4096;

/// A single-use generic netlink request buffer.
///
/// `create` starts a message; typed `put_*` calls append attributes. The
/// buffer is consumed by [`take_message`](Self::take_message) when the
/// request is sent, so a request must be re-created before it is reused.
#[derive(Debug)]
pub struct WifiRequest {
    msg: Option<MessageBuilder>,
    cmd: u8,
    max_size: usize,
}

impl Default for WifiRequest {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl WifiRequest {
    /// Create an empty request with a size limit.
    pub fn new(max_size: usize) -> Self {
        Self {
            msg: None,
            cmd: 0,
            max_size,
        }
    }

    /// Start a fresh message, dropping any previous one.
    ///
    /// `hdrlen` zeroed bytes of family header follow the genl header.
    pub fn create(&mut self, family: u16, cmd: u8, flags: u16, hdrlen: usize) -> Result<()> {
        self.msg = None;
        let mut msg = MessageBuilder::new(family, flags);
        msg.append(&GenlMsgHdr::new(cmd, 0));
        if hdrlen > 0 {
            msg.append_zeroed(hdrlen);
        }
        if msg.len() > self.max_size {
            return Err(Error::MessageTooLarge {
                size: msg.len(),
                limit: self.max_size,
            });
        }
        self.cmd = cmd;
        self.msg = Some(msg);
        Ok(())
    }

    /// Check whether a message is currently being built.
    pub fn is_created(&self) -> bool {
        self.msg.is_some()
    }

    /// Command of the current (or last) message.
    pub fn cmd(&self) -> u8 {
        self.cmd
    }

    /// Bytes built so far.
    pub fn len(&self) -> usize {
        self.msg.as_ref().map_or(0, MessageBuilder::len)
    }

    /// Check whether nothing has been built.
    pub fn is_empty(&self) -> bool {
        self.msg.is_none()
    }

    /// Drop the current message.
    pub fn destroy(&mut self) {
        self.msg = None;
    }

    /// Finalize the message and release the buffer.
    pub fn take_message(&mut self) -> Result<MessageBuilder> {
        self.msg.take().ok_or(Error::NotCreated)
    }

    fn reserve(&mut self, payload_len: usize) -> Result<&mut MessageBuilder> {
        let max_size = self.max_size;
        let msg = self.msg.as_mut().ok_or(Error::NotCreated)?;
        let size = msg.len() + nla_align(NLA_HDRLEN + payload_len);
        if size > max_size {
            return Err(Error::MessageTooLarge {
                size,
                limit: max_size,
            });
        }
        Ok(msg)
    }

    pub fn put_bytes(&mut self, attr: u16, data: &[u8]) -> Result<()> {
        self.reserve(data.len())?.append_attr(attr, data);
        Ok(())
    }

    pub fn put_u8(&mut self, attr: u16, value: u8) -> Result<()> {
        self.put_bytes(attr, &[value])
    }

    pub fn put_u16(&mut self, attr: u16, value: u16) -> Result<()> {
        self.put_bytes(attr, &value.to_ne_bytes())
    }

    pub fn put_u32(&mut self, attr: u16, value: u32) -> Result<()> {
        self.put_bytes(attr, &value.to_ne_bytes())
    }

    pub fn put_u64(&mut self, attr: u16, value: u64) -> Result<()> {
        self.put_bytes(attr, &value.to_ne_bytes())
    }

    pub fn put_i8(&mut self, attr: u16, value: i8) -> Result<()> {
        self.put_bytes(attr, &value.to_ne_bytes())
    }

    pub fn put_i16(&mut self, attr: u16, value: i16) -> Result<()> {
        self.put_bytes(attr, &value.to_ne_bytes())
    }

    pub fn put_i32(&mut self, attr: u16, value: i32) -> Result<()> {
        self.put_bytes(attr, &value.to_ne_bytes())
    }

    pub fn put_i64(&mut self, attr: u16, value: i64) -> Result<()> {
        self.put_bytes(attr, &value.to_ne_bytes())
    }

    /// Put a NUL-terminated string.
    pub fn put_string(&mut self, attr: u16, value: &str) -> Result<()> {
        self.reserve(value.len() + 1)?.append_attr_str(attr, value);
        Ok(())
    }

    /// Put a 6-byte hardware address.
    pub fn put_addr(&mut self, attr: u16, addr: &[u8; 6]) -> Result<()> {
        self.put_bytes(attr, addr)
    }

    /// Put a zero-length flag attribute.
    pub fn put_flag(&mut self, attr: u16) -> Result<()> {
        self.reserve(0)?.append_attr_empty(attr);
        Ok(())
    }

    /// Open a nested attribute.
    pub fn attr_start(&mut self, attr: u16) -> Result<NestToken> {
        Ok(self.reserve(0)?.nest_start(attr))
    }

    /// Close a nested attribute.
    pub fn attr_end(&mut self, token: NestToken) -> Result<()> {
        let msg = self.msg.as_mut().ok_or(Error::NotCreated)?;
        msg.nest_end(token);
        Ok(())
    }

    /// Target the request at an interface index.
    pub fn set_iface_index(&mut self, ifindex: u32) -> Result<()> {
        self.put_u32(NL80211_ATTR_IFINDEX, ifindex)
    }

    /// Target the request at an interface by name (resolved through sysfs).
    pub fn set_iface_id(&mut self, name: &str) -> Result<()> {
        let ifindex = iface::ifindex(iface::DEFAULT_SYSFS_NET, name)?;
        self.set_iface_index(ifindex)
    }
}
