//! `nlattr` TLVs: the header, iteration, and a per-level lookup table.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};

/// Round `len` up to the 4-byte attribute boundary.
#[inline]
pub const fn nla_align(len: usize) -> usize {
    (len + 3) & !3
}

pub const NLA_HDRLEN: usize = size_of::<NlAttr>();

/// Set on attributes whose payload is itself a list of attributes.
pub const NLA_F_NESTED: u16 = 1 << 15;
const NLA_F_NET_BYTEORDER: u16 = 1 << 14;

/// Attribute types an [`AttrTable`] can index.
const ATTR_SLOTS: usize = 256;

/// `struct nlattr`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlAttr {
    /// Header plus payload, without trailing padding.
    pub nla_len: u16,
    pub nla_type: u16,
}

impl NlAttr {
    /// Header for a payload of `payload_len` bytes.
    pub fn new(attr_type: u16, payload_len: usize) -> Self {
        Self {
            nla_len: (NLA_HDRLEN + payload_len) as u16,
            nla_type: attr_type,
        }
    }

    /// Type with the nested and byte-order flags masked off.
    pub fn kind(&self) -> u16 {
        self.nla_type & !(NLA_F_NESTED | NLA_F_NET_BYTEORDER)
    }

    pub fn as_bytes(&self) -> &[u8] {
        IntoBytes::as_bytes(self)
    }
}

/// Take the first attribute off `data`: `(kind, payload, rest)`.
fn split_attr(data: &[u8]) -> Result<(u16, &[u8], &[u8])> {
    let (attr, _) = NlAttr::ref_from_prefix(data).map_err(|_| {
        Error::InvalidAttribute(format!("{} trailing bytes after last attribute", data.len()))
    })?;
    let len = attr.nla_len as usize;
    if len < NLA_HDRLEN || len > data.len() {
        return Err(Error::InvalidAttribute(format!(
            "attribute {} has length {} with {} bytes left",
            attr.kind(),
            len,
            data.len()
        )));
    }
    let rest = data.get(nla_align(len)..).unwrap_or_default();
    Ok((attr.kind(), &data[NLA_HDRLEN..len], rest))
}

/// Walks `(kind, payload)` pairs, stopping quietly at the first malformed
/// attribute. [`AttrTable::parse`] reports malformed input instead.
pub struct AttrIter<'a> {
    rest: &'a [u8],
}

impl<'a> AttrIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { rest: data }
    }
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (kind, payload, rest) = split_attr(self.rest).ok()?;
        self.rest = rest;
        Some((kind, payload))
    }
}

/// Attribute index over one nesting level: type -> payload.
///
/// Later duplicates overwrite earlier ones. Attribute types outside the
/// table are ignored.
#[derive(Clone)]
pub struct AttrTable<'a> {
    slots: [Option<&'a [u8]>; ATTR_SLOTS],
}

impl<'a> AttrTable<'a> {
    /// Empty table; every lookup misses.
    pub fn empty() -> Self {
        Self {
            slots: [None; ATTR_SLOTS],
        }
    }

    /// Index the attributes in `data`, rejecting malformed TLVs.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let mut table = Self::empty();
        let mut rest = data;
        while !rest.is_empty() {
            let (kind, payload, tail) = split_attr(rest)?;
            if let Some(slot) = table.slots.get_mut(kind as usize) {
                *slot = Some(payload);
            }
            rest = tail;
        }
        Ok(table)
    }

    pub fn get(&self, attr: u16) -> Option<&'a [u8]> {
        self.slots.get(attr as usize).copied().flatten()
    }

    pub fn contains(&self, attr: u16) -> bool {
        self.get(attr).is_some()
    }

    /// Index the payload of the nested attribute `attr`.
    pub fn nested(&self, attr: u16) -> Result<Option<AttrTable<'a>>> {
        self.get(attr).map(AttrTable::parse).transpose()
    }

    fn value<T: Default>(&self, attr: u16, decode: fn(&[u8]) -> Result<T>) -> T {
        self.get(attr)
            .and_then(|p| decode(p).ok())
            .unwrap_or_default()
    }

    // Absent or short attributes read as zero.

    pub fn u8(&self, attr: u16) -> u8 {
        self.value(attr, get::u8)
    }

    pub fn u16(&self, attr: u16) -> u16 {
        self.value(attr, get::u16_ne)
    }

    pub fn u32(&self, attr: u16) -> u32 {
        self.value(attr, get::u32_ne)
    }

    pub fn u64(&self, attr: u16) -> u64 {
        self.value(attr, get::u64_ne)
    }

    /// String payload up to the first NUL; empty when absent or not UTF-8.
    pub fn string(&self, attr: u16) -> &'a str {
        self.get(attr)
            .and_then(|p| get::string(p).ok())
            .unwrap_or("")
    }
}

impl std::fmt::Debug for AttrTable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let present = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(kind, slot)| slot.map(|p| (kind, p.len())));
        f.debug_map().entries(present).finish()
    }
}

/// Strict payload decoders. Native endian, like the kernel writes them.
pub mod get {
    use crate::error::{Error, Result};

    fn array<const N: usize>(data: &[u8], what: &str) -> Result<[u8; N]> {
        data.get(..N)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| Error::InvalidAttribute(format!("truncated {} attribute", what)))
    }

    pub fn u8(data: &[u8]) -> Result<u8> {
        array::<1>(data, "u8").map(|[b]| b)
    }

    pub fn u16_ne(data: &[u8]) -> Result<u16> {
        array(data, "u16").map(u16::from_ne_bytes)
    }

    pub fn u32_ne(data: &[u8]) -> Result<u32> {
        array(data, "u32").map(u32::from_ne_bytes)
    }

    pub fn u64_ne(data: &[u8]) -> Result<u64> {
        array(data, "u64").map(u64::from_ne_bytes)
    }

    /// Bytes before the first NUL, as UTF-8.
    pub fn string(data: &[u8]) -> Result<&str> {
        let text = data.split(|&b| b == 0).next().unwrap_or_default();
        std::str::from_utf8(text)
            .map_err(|e| Error::InvalidAttribute(format!("string attribute: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(kind: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = NlAttr::new(kind, payload.len()).as_bytes().to_vec();
        out.extend_from_slice(payload);
        out.resize(nla_align(out.len()), 0);
        out
    }

    #[test]
    fn test_attr_iter() {
        let mut buf = attr(1, &7u32.to_ne_bytes());
        buf.extend(attr(2, b"wlan0\0"));

        let items: Vec<_> = AttrIter::new(&buf).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0, 1);
        assert_eq!(get::string(items[1].1).unwrap(), "wlan0");
    }

    #[test]
    fn test_attr_iter_stops_at_garbage() {
        let mut buf = attr(1, &[1]);
        buf.extend_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(AttrIter::new(&buf).count(), 1);
    }

    #[test]
    fn test_table_last_duplicate_wins() {
        let mut buf = attr(5, &1u32.to_ne_bytes());
        buf.extend(attr(5, &2u32.to_ne_bytes()));

        let table = AttrTable::parse(&buf).unwrap();
        assert_eq!(table.u32(5), 2);
    }

    #[test]
    fn test_table_absent_defaults() {
        let table = AttrTable::parse(&[]).unwrap();
        assert!(!table.contains(3));
        assert_eq!(table.u64(3), 0);
        assert_eq!(table.string(3), "");
    }

    #[test]
    fn test_table_rejects_overlong_attribute() {
        let mut buf = attr(1, &[0u8; 4]);
        // Claim 64 bytes when only 8 exist.
        buf[0..2].copy_from_slice(&64u16.to_ne_bytes());
        assert!(AttrTable::parse(&buf).is_err());
    }

    #[test]
    fn test_table_rejects_trailing_garbage() {
        let mut buf = attr(1, &[1]);
        buf.extend_from_slice(&[0xff, 0xff]);
        assert!(AttrTable::parse(&buf).is_err());
    }

    #[test]
    fn test_nested_table() {
        let inner = attr(9, &42u16.to_ne_bytes());
        let outer = attr(3 | NLA_F_NESTED, &inner);

        let table = AttrTable::parse(&outer).unwrap();
        assert!(!table.contains(9));
        let nested = table.nested(3).unwrap().unwrap();
        assert_eq!(nested.u16(9), 42);
    }

    #[test]
    fn test_get_truncated() {
        assert!(get::u32_ne(&[1, 2]).is_err());
        assert!(get::u8(&[]).is_err());
        assert_eq!(get::u8(&[9, 1]).unwrap(), 9);
        assert_eq!(get::string(b"abc\0def").unwrap(), "abc");
    }
}
