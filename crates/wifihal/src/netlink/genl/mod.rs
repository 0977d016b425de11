//! Generic netlink framing and the `nlctrl` control family.
//!
//! Every generic netlink message carries a 4-byte `genlmsghdr` after the
//! `nlmsghdr`. The HAL talks to `nl80211` and, when the driver offers it,
//! `cld80211`; both ids are assigned at runtime and resolved through
//! `nlctrl` along with their multicast groups.

mod family;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub use family::{FamilyInfo, query_family};

/// `struct genlmsghdr`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct GenlMsgHdr {
    pub cmd: u8,
    pub version: u8,
    pub reserved: u16,
}

pub const GENL_HDRLEN: usize = size_of::<GenlMsgHdr>();

impl GenlMsgHdr {
    #[inline]
    pub const fn new(cmd: u8, version: u8) -> Self {
        Self {
            cmd,
            version,
            reserved: 0,
        }
    }

    /// Copy the header off the front of a netlink payload.
    pub fn from_bytes(payload: &[u8]) -> Option<Self> {
        Self::read_from_prefix(payload).ok().map(|(hdr, _)| hdr)
    }
}

/// `nlctrl` has the one fixed id.
pub const GENL_ID_CTRL: u16 = 0x10;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlCmd {
    NewFamily = 1,
    GetFamily = 3,
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlAttr {
    FamilyId = 1,
    FamilyName = 2,
    Version = 3,
    McastGroups = 7,
}

/// Attributes of one entry in `CTRL_ATTR_MCAST_GROUPS`.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlAttrMcastGrp {
    Name = 1,
    Id = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genl_header() {
        assert_eq!(GENL_HDRLEN, 4);
        // NL80211_CMD_VENDOR followed by attribute bytes.
        let hdr = GenlMsgHdr::from_bytes(&[103, 1, 0, 0, 0xaa]).unwrap();
        assert_eq!(hdr.cmd, 103);
        assert_eq!(hdr.version, 1);
        assert!(GenlMsgHdr::from_bytes(&[103, 1, 0]).is_none());
    }
}
