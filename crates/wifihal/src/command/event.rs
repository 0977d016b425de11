//! Read-only view over a received generic netlink message.

use crate::error::{Error, Result};
use crate::netlink::attr::AttrTable;
use crate::netlink::genl::{GENL_HDRLEN, GenlMsgHdr};
use crate::netlink::message::{NLMSG_HDRLEN, NlMsgHdr};
use crate::nl80211::{
    NL80211_ATTR_VENDOR_DATA, NL80211_ATTR_VENDOR_ID, NL80211_ATTR_VENDOR_SUBCMD,
    NL80211_CMD_VENDOR,
};

/// A borrowed, lazily indexed generic netlink message.
///
/// Nothing is decoded until [`parse`](Self::parse); accessors return
/// defaults before that, and after a failed parse.
pub struct WifiEvent<'a> {
    data: &'a [u8],
    parsed: Option<Parsed<'a>>,
}

struct Parsed<'a> {
    header: &'a NlMsgHdr,
    genl: GenlMsgHdr,
    attrs: AttrTable<'a>,
}

impl<'a> WifiEvent<'a> {
    /// Wrap one complete netlink message (header included).
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, parsed: None }
    }

    /// Index the top-level attributes. Idempotent.
    pub fn parse(&mut self) -> Result<()> {
        if self.parsed.is_some() {
            return Ok(());
        }

        let header = NlMsgHdr::from_bytes(self.data)?;
        let len = header.nlmsg_len as usize;
        if len < NLMSG_HDRLEN + GENL_HDRLEN || len > self.data.len() {
            return Err(Error::InvalidMessage(format!(
                "generic netlink message length {} with {} bytes",
                len,
                self.data.len()
            )));
        }
        let payload = &self.data[NLMSG_HDRLEN..len];
        let genl = GenlMsgHdr::from_bytes(payload)
            .ok_or_else(|| Error::InvalidMessage("GENL header too short".into()))?;
        let attrs = AttrTable::parse(&payload[GENL_HDRLEN..])?;

        self.parsed = Some(Parsed {
            header,
            genl,
            attrs,
        });
        Ok(())
    }

    /// Check whether `parse` has succeeded.
    pub fn is_parsed(&self) -> bool {
        self.parsed.is_some()
    }

    /// The raw message.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Netlink header, once parsed.
    pub fn header(&self) -> Option<&'a NlMsgHdr> {
        self.parsed.as_ref().map(|p| p.header)
    }

    /// Generic netlink command (0 before parse).
    pub fn cmd(&self) -> u8 {
        self.parsed.as_ref().map_or(0, |p| p.genl.cmd)
    }

    /// Attribute index (empty before parse).
    pub fn attrs(&self) -> AttrTable<'a> {
        self.parsed
            .as_ref()
            .map_or_else(AttrTable::empty, |p| p.attrs.clone())
    }

    /// Payload of `attr`, if present.
    pub fn get_attribute(&self, attr: u16) -> Option<&'a [u8]> {
        self.parsed.as_ref().and_then(|p| p.attrs.get(attr))
    }

    /// Index the nested attribute `attr`.
    pub fn get_nested(&self, attr: u16) -> Result<Option<AttrTable<'a>>> {
        match &self.parsed {
            Some(p) => p.attrs.nested(attr),
            None => Ok(None),
        }
    }

    pub fn get_u8(&self, attr: u16) -> u8 {
        self.parsed.as_ref().map_or(0, |p| p.attrs.u8(attr))
    }

    pub fn get_u16(&self, attr: u16) -> u16 {
        self.parsed.as_ref().map_or(0, |p| p.attrs.u16(attr))
    }

    pub fn get_u32(&self, attr: u16) -> u32 {
        self.parsed.as_ref().map_or(0, |p| p.attrs.u32(attr))
    }

    pub fn get_u64(&self, attr: u16) -> u64 {
        self.parsed.as_ref().map_or(0, |p| p.attrs.u64(attr))
    }

    pub fn get_i8(&self, attr: u16) -> i8 {
        self.get_u8(attr) as i8
    }

    pub fn get_i16(&self, attr: u16) -> i16 {
        self.get_u16(attr) as i16
    }

    pub fn get_i32(&self, attr: u16) -> i32 {
        self.get_u32(attr) as i32
    }

    pub fn get_i64(&self, attr: u16) -> i64 {
        self.get_u64(attr) as i64
    }

    pub fn get_string(&self, attr: u16) -> &'a str {
        self.parsed.as_ref().map_or("", |p| p.attrs.string(attr))
    }

    /// Check whether this is an `NL80211_CMD_VENDOR` message.
    pub fn is_vendor(&self) -> bool {
        self.cmd() == NL80211_CMD_VENDOR
    }

    pub fn vendor_id(&self) -> u32 {
        self.get_u32(NL80211_ATTR_VENDOR_ID)
    }

    pub fn vendor_subcmd(&self) -> u32 {
        self.get_u32(NL80211_ATTR_VENDOR_SUBCMD)
    }

    /// `NL80211_ATTR_VENDOR_DATA` payload, if present.
    pub fn vendor_data(&self) -> Option<&'a [u8]> {
        self.get_attribute(NL80211_ATTR_VENDOR_DATA)
    }

    /// Copy the message so it can cross task boundaries.
    pub fn to_owned_event(&self) -> OwnedEvent {
        OwnedEvent {
            data: self.data.to_vec(),
        }
    }
}

impl std::fmt::Debug for WifiEvent<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiEvent")
            .field("len", &self.data.len())
            .field("cmd", &self.cmd())
            .field("parsed", &self.is_parsed())
            .finish()
    }
}

/// An owned copy of a received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedEvent {
    data: Vec<u8>,
}

impl OwnedEvent {
    /// Take ownership of a raw message.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Borrow as a parsed [`WifiEvent`].
    pub fn event(&self) -> Result<WifiEvent<'_>> {
        let mut event = WifiEvent::new(&self.data);
        event.parse()?;
        Ok(event)
    }

    /// The raw message.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
