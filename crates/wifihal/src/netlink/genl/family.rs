//! Family and multicast group resolution through `nlctrl`.

use std::collections::HashMap;

use super::{CtrlAttr, CtrlAttrMcastGrp, CtrlCmd, GENL_HDRLEN, GENL_ID_CTRL, GenlMsgHdr};
use crate::error::{Error, Result};
use crate::netlink::attr::{AttrIter, AttrTable, get};
use crate::netlink::builder::MessageBuilder;
use crate::netlink::message::{MessageIter, NLM_F_ACK, NLM_F_REQUEST, NlMsgError};
use crate::netlink::socket::NetlinkSocket;

/// A resolved generic netlink family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FamilyInfo {
    /// Goes in `nlmsg_type` of every request to the family.
    pub id: u16,
    pub version: u8,
    /// Multicast group name to group id.
    pub mcast_groups: HashMap<String, u32>,
}

impl FamilyInfo {
    pub fn mcast_group(&self, name: &str) -> Option<u32> {
        self.mcast_groups.get(name).copied()
    }

    /// Decode the attributes of a `CTRL_CMD_NEWFAMILY` reply.
    fn from_attrs(attrs: &[u8]) -> Result<Self> {
        let table = AttrTable::parse(attrs)?;
        let id = table
            .get(CtrlAttr::FamilyId as u16)
            .ok_or_else(|| Error::InvalidMessage("nlctrl reply without family id".into()))?;

        let mut mcast_groups = HashMap::new();
        if let Some(groups) = table.get(CtrlAttr::McastGroups as u16) {
            for (_, group) in AttrIter::new(groups) {
                let group = AttrTable::parse(group)?;
                let (name, grp_id) = (CtrlAttrMcastGrp::Name as u16, CtrlAttrMcastGrp::Id as u16);
                if group.contains(name) && group.contains(grp_id) {
                    mcast_groups.insert(group.string(name).to_string(), group.u32(grp_id));
                }
            }
        }

        Ok(Self {
            id: get::u16_ne(id)?,
            version: table.u32(CtrlAttr::Version as u16) as u8,
            mcast_groups,
        })
    }
}

/// Resolve `name` on `socket`.
///
/// Consumes replies up to the ACK so the socket is clean for the next
/// exchange. An unknown family is [`Error::FamilyNotFound`].
pub async fn query_family(socket: &NetlinkSocket, name: &str) -> Result<FamilyInfo> {
    let seq = socket.next_seq();
    let mut request = MessageBuilder::new(GENL_ID_CTRL, NLM_F_REQUEST | NLM_F_ACK);
    request.append(&GenlMsgHdr::new(CtrlCmd::GetFamily as u8, 1));
    request.append_attr_str(CtrlAttr::FamilyName as u16, name);
    request.set_seq(seq);
    request.set_pid(socket.pid());
    socket.send(&request.finish()).await?;

    let not_found = || Error::FamilyNotFound {
        name: name.to_string(),
    };
    let mut found = None;
    loop {
        let data = socket.recv_msg().await?;
        for msg in MessageIter::new(&data) {
            let msg = msg?;
            if msg.header.nlmsg_seq != seq || msg.header.is_done() {
                continue;
            }

            if msg.header.is_error() {
                return match NlMsgError::from_bytes(msg.payload)?.error {
                    0 => found.ok_or_else(not_found),
                    e if e == -libc::ENOENT => Err(not_found()),
                    e => Err(Error::from_errno(e).with_context(format!("resolve {}", name))),
                };
            }

            let attrs = msg
                .payload
                .get(GENL_HDRLEN..)
                .ok_or_else(|| Error::InvalidMessage("GENL header too short".into()))?;
            found = Some(FamilyInfo::from_attrs(attrs)?);
        }
    }
}
