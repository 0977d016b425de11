//! Monitor socket registrations.
//!
//! A client attaches its datagram address for a (family, command) pair. For
//! `NL80211_CMD_REGISTER_ACTION` the registration also carries the frame
//! match prefix from the client's netlink request, and matches must not
//! overlap between clients.

use super::wire::{CtrlFamily, CtrlStatus, MONSOCK_MAX, RequestHeader, embedded_genl};
use crate::netlink::attr::AttrTable;
use crate::netlink::genl::GENL_HDRLEN;
use crate::netlink::message::NLMSG_HDRLEN;
use crate::nl80211::{IEEE80211_HDR_LEN, NL80211_ATTR_FRAME_MATCH, NL80211_CMD_REGISTER_ACTION};

/// One attached monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRegistration {
    /// Raw `sockaddr_un` bytes of the client.
    pub addr: Vec<u8>,
    pub family: u32,
    pub cmd_id: u32,
    /// Action frame prefix; empty matches every frame.
    pub frame_match: Vec<u8>,
}

/// The attached monitors, in attach order.
#[derive(Debug, Default)]
pub struct MonitorRegistry {
    regs: Vec<MonitorRegistration>,
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, req: &RequestHeader, data: &[u8]) -> CtrlStatus {
        self.register(req, data, true)
    }

    pub fn detach(&mut self, req: &RequestHeader, data: &[u8]) -> CtrlStatus {
        self.register(req, data, false)
    }

    fn register(&mut self, req: &RequestHeader, data: &[u8], attach: bool) -> CtrlStatus {
        let Some(addr) = req.monsock() else {
            tracing::error!(len = req.monsock_len, max = MONSOCK_MAX, "invalid monitor socket length");
            return CtrlStatus::InvalidAddress;
        };

        let mut frame_match: &[u8] = &[];
        if req.family == CtrlFamily::Generic as u32
            && req.cmd_id == u32::from(NL80211_CMD_REGISTER_ACTION)
        {
            frame_match = match action_match(data) {
                Ok(m) => m,
                Err(status) => return status,
            };

            let overlap = self.regs.iter().position(|reg| {
                let n = reg.frame_match.len().min(frame_match.len());
                !reg.frame_match.is_empty() && reg.frame_match[..n] == frame_match[..n]
            });
            if let Some(i) = overlap {
                if self.regs[i].addr != addr {
                    tracing::error!("action frame registered for other client");
                    return CtrlStatus::Conflict;
                }
                if attach {
                    tracing::error!("action frame already registered for this client");
                    return CtrlStatus::Conflict;
                }
                self.regs.remove(i);
                return CtrlStatus::Success;
            }
        } else if let Some(i) = self
            .regs
            .iter()
            .position(|r| r.addr == addr && r.family == req.family && r.cmd_id == req.cmd_id)
        {
            if !attach {
                self.regs.remove(i);
            }
            return CtrlStatus::Success;
        }

        if !attach {
            tracing::error!(family = req.family, cmd = req.cmd_id, "detaching an unregistered socket");
            return CtrlStatus::Conflict;
        }

        tracing::debug!(
            family = req.family,
            cmd = req.cmd_id,
            match_len = frame_match.len(),
            "monitor attached"
        );
        self.regs.push(MonitorRegistration {
            addr: addr.to_vec(),
            family: req.family,
            cmd_id: req.cmd_id,
            frame_match: frame_match.to_vec(),
        });
        CtrlStatus::Success
    }

    /// Addresses of GENERIC monitors whose match prefixes the body of
    /// `frame` (the 802.11 header is skipped).
    pub fn frame_targets(&self, frame: &[u8]) -> Vec<Vec<u8>> {
        let body = frame.get(IEEE80211_HDR_LEN..).unwrap_or(&[]);
        self.regs
            .iter()
            .filter(|r| r.family == CtrlFamily::Generic as u32)
            .filter(|r| body.starts_with(&r.frame_match))
            .map(|r| r.addr.clone())
            .collect()
    }

    /// Addresses of monitors attached for exactly (family, cmd_id).
    pub fn command_targets(&self, family: CtrlFamily, cmd_id: u32) -> Vec<Vec<u8>> {
        self.regs
            .iter()
            .filter(|r| r.family == family as u32 && r.cmd_id == cmd_id)
            .map(|r| r.addr.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MonitorRegistration> {
        self.regs.iter()
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// Drop every registration, returning how many there were.
    pub fn clear(&mut self) -> usize {
        std::mem::take(&mut self.regs).len()
    }
}

/// `NL80211_ATTR_FRAME_MATCH` of a REGISTER_ACTION request.
fn action_match(data: &[u8]) -> Result<&[u8], CtrlStatus> {
    let (hdr, _cmd) = embedded_genl(data).map_err(|e| {
        tracing::error!(error = %e, "invalid register action message");
        CtrlStatus::Failed
    })?;
    let attrs = AttrTable::parse(&data[NLMSG_HDRLEN + GENL_HDRLEN..hdr.nlmsg_len as usize])
        .map_err(|e| {
            tracing::error!(error = %e, "unable to parse nl attributes");
            CtrlStatus::Failed
        })?;
    attrs.get(NL80211_ATTR_FRAME_MATCH).ok_or_else(|| {
        tracing::error!("register action without frame match");
        CtrlStatus::Failed
    })
}
