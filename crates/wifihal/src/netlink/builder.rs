//! Outgoing netlink message assembly.

use zerocopy::{Immutable, IntoBytes};

use super::attr::{NLA_F_NESTED, NLA_HDRLEN, NlAttr, nla_align};
use super::message::{NLMSG_HDRLEN, NlMsgHdr, nlmsg_align};

/// An open nested attribute, returned by [`MessageBuilder::nest_start`].
///
/// Not `Copy`: a nest is closed exactly once.
#[derive(Debug)]
#[must_use = "a nested attribute must be closed with nest_end"]
pub struct NestToken {
    /// Where the nest's attribute header starts within the body.
    start: usize,
}

/// A netlink message under construction.
///
/// The header is kept apart from the body and only serialized by
/// [`finish`](Self::finish), which fills in `nlmsg_len`.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    header: NlMsgHdr,
    body: Vec<u8>,
}

impl MessageBuilder {
    pub fn new(msg_type: u16, flags: u16) -> Self {
        Self {
            header: NlMsgHdr::new(msg_type, flags),
            body: Vec::with_capacity(256),
        }
    }

    /// Total message length so far, header included.
    pub fn len(&self) -> usize {
        NLMSG_HDRLEN + self.body.len()
    }

    /// True while nothing follows the header.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Append a fixed-size struct (a family header), padded to 4 bytes.
    pub fn append<T: IntoBytes + Immutable>(&mut self, data: &T) {
        self.body.extend_from_slice(data.as_bytes());
        self.pad(nlmsg_align);
    }

    /// Append `len` zero bytes of family header space.
    pub fn append_zeroed(&mut self, len: usize) {
        self.body.resize(self.body.len() + len, 0);
        self.pad(nlmsg_align);
    }

    pub fn append_attr(&mut self, attr_type: u16, payload: &[u8]) {
        self.body
            .extend_from_slice(NlAttr::new(attr_type, payload.len()).as_bytes());
        self.body.extend_from_slice(payload);
        self.pad(nla_align);
    }

    /// Zero-length flag attribute.
    pub fn append_attr_empty(&mut self, attr_type: u16) {
        self.append_attr(attr_type, &[]);
    }

    pub fn append_attr_u8(&mut self, attr_type: u16, value: u8) {
        self.append_attr(attr_type, &[value]);
    }

    pub fn append_attr_u16(&mut self, attr_type: u16, value: u16) {
        self.append_attr(attr_type, &value.to_ne_bytes());
    }

    pub fn append_attr_u32(&mut self, attr_type: u16, value: u32) {
        self.append_attr(attr_type, &value.to_ne_bytes());
    }

    pub fn append_attr_u64(&mut self, attr_type: u16, value: u64) {
        self.append_attr(attr_type, &value.to_ne_bytes());
    }

    /// NUL-terminated string attribute.
    pub fn append_attr_str(&mut self, attr_type: u16, value: &str) {
        let mut payload = value.as_bytes().to_vec();
        payload.push(0);
        self.append_attr(attr_type, &payload);
    }

    /// Open a nested attribute; attributes appended until the matching
    /// [`nest_end`](Self::nest_end) land inside it.
    pub fn nest_start(&mut self, attr_type: u16) -> NestToken {
        let start = self.body.len();
        self.body
            .extend_from_slice(NlAttr::new(attr_type | NLA_F_NESTED, 0).as_bytes());
        NestToken { start }
    }

    pub fn nest_end(&mut self, token: NestToken) {
        let nla_len = self.body.len() - token.start;
        debug_assert!(nla_len >= NLA_HDRLEN);
        self.body[token.start..token.start + 2].copy_from_slice(&(nla_len as u16).to_ne_bytes());
        self.pad(nla_align);
    }

    pub fn flags(&self) -> u16 {
        self.header.nlmsg_flags
    }

    pub fn set_flags(&mut self, flags: u16) {
        self.header.nlmsg_flags = flags;
    }

    pub fn set_seq(&mut self, seq: u32) {
        self.header.nlmsg_seq = seq;
    }

    pub fn set_pid(&mut self, pid: u32) {
        self.header.nlmsg_pid = pid;
    }

    /// Serialize header and body into one datagram.
    pub fn finish(mut self) -> Vec<u8> {
        self.header.nlmsg_len = self.len() as u32;
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(self.header.as_bytes());
        out.resize(NLMSG_HDRLEN, 0);
        out.extend_from_slice(&self.body);
        out
    }

    fn pad(&mut self, align: fn(usize) -> usize) {
        let aligned = align(self.body.len());
        self.body.resize(aligned, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::attr::AttrTable;
    use crate::netlink::message::NLM_F_REQUEST;

    #[test]
    fn test_header_only_message() {
        let builder = MessageBuilder::new(0x1c, NLM_F_REQUEST);
        assert!(builder.is_empty());
        let msg = builder.finish();
        assert_eq!(msg.len(), NLMSG_HDRLEN);

        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_len as usize, NLMSG_HDRLEN);
        assert_eq!(header.nlmsg_type, 0x1c);
        assert_eq!(header.nlmsg_flags, NLM_F_REQUEST);
    }

    #[test]
    fn test_u8_attribute_padded() {
        let mut builder = MessageBuilder::new(0x1c, NLM_F_REQUEST);
        builder.append_attr_u8(1, 7);
        assert_eq!(builder.len(), NLMSG_HDRLEN + NLA_HDRLEN + 4);
    }

    #[test]
    fn test_nest_length_covers_children() {
        let mut builder = MessageBuilder::new(0x1c, NLM_F_REQUEST);
        let nest = builder.nest_start(1);
        builder.append_attr_u32(2, 100);
        builder.append_attr_str(3, "wlan0");
        builder.nest_end(nest);
        builder.append_attr_u16(4, 9);
        let msg = builder.finish();

        let table = AttrTable::parse(&msg[NLMSG_HDRLEN..]).unwrap();
        let inner = table.nested(1).unwrap().unwrap();
        assert_eq!(inner.u32(2), 100);
        assert_eq!(inner.string(3), "wlan0");
        assert!(!inner.contains(4));
        assert_eq!(table.u16(4), 9);
    }

    #[test]
    fn test_header_fields_written_on_finish() {
        let mut builder = MessageBuilder::new(0x1c, 0);
        builder.append_zeroed(3);
        assert_eq!(builder.len(), NLMSG_HDRLEN + 4);
        builder.set_flags(builder.flags() | NLM_F_REQUEST);
        builder.set_seq(9);
        builder.set_pid(1234);
        let msg = builder.finish();

        let header = NlMsgHdr::from_bytes(&msg).unwrap();
        assert_eq!(header.nlmsg_len as usize, msg.len());
        assert_eq!(header.nlmsg_flags, NLM_F_REQUEST);
        assert_eq!(header.nlmsg_seq, 9);
        assert_eq!(header.nlmsg_pid, 1234);
    }
}
