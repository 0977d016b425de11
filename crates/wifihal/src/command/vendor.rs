//! nl80211 vendor command framing.

use super::event::WifiEvent;
use super::{CommandCore, EventStatus, RequestId, WifiCommand};
use crate::error::Result;
use crate::nl80211::{NL80211_ATTR_VENDOR_ID, NL80211_ATTR_VENDOR_SUBCMD, NL80211_CMD_VENDOR};

/// A command addressed to one (vendor id, subcmd) pair.
///
/// `create()` frames `NL80211_CMD_VENDOR` with the vendor id, subcmd and
/// (when set) the target interface. Callers append their own
/// `NL80211_ATTR_VENDOR_DATA` nest afterwards. Replies and events have
/// their vendor data copied into [`vendor_data`](Self::vendor_data).
#[derive(Debug)]
pub struct VendorCommand {
    core: CommandCore,
    family: u16,
    ifindex: Option<u32>,
    vendor_id: u32,
    subcmd: u32,
    vendor_data: Option<Vec<u8>>,
}

impl VendorCommand {
    pub fn new(family: u16, ifindex: Option<u32>, vendor_id: u32, subcmd: u32) -> Self {
        Self::with_id(family, ifindex, 0, vendor_id, subcmd)
    }

    /// Vendor command carrying a caller-visible request id.
    pub fn with_id(
        family: u16,
        ifindex: Option<u32>,
        id: RequestId,
        vendor_id: u32,
        subcmd: u32,
    ) -> Self {
        Self {
            core: CommandCore::new(id),
            family,
            ifindex,
            vendor_id,
            subcmd,
            vendor_data: None,
        }
    }

    /// Limit the request to `size` bytes.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.core = CommandCore::with_max_size(self.core.id(), size);
        self
    }

    pub fn vendor_id(&self) -> u32 {
        self.vendor_id
    }

    pub fn subcmd(&self) -> u32 {
        self.subcmd
    }

    /// Vendor data from the last reply or event.
    pub fn vendor_data(&self) -> Option<&[u8]> {
        self.vendor_data.as_deref()
    }

    fn capture(&mut self, msg: &WifiEvent<'_>) {
        self.vendor_data = msg.vendor_data().map(<[u8]>::to_vec);
    }
}

impl WifiCommand for VendorCommand {
    fn core(&self) -> &CommandCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CommandCore {
        &mut self.core
    }

    fn create(&mut self) -> Result<()> {
        let request = self.core.request_mut();
        request.create(self.family, NL80211_CMD_VENDOR, 0, 0)?;
        request.put_u32(NL80211_ATTR_VENDOR_ID, self.vendor_id)?;
        request.put_u32(NL80211_ATTR_VENDOR_SUBCMD, self.subcmd)?;
        if let Some(ifindex) = self.ifindex {
            request.set_iface_index(ifindex)?;
        }
        Ok(())
    }

    fn handle_response(&mut self, reply: &mut WifiEvent<'_>) -> Result<()> {
        reply.parse()?;
        self.capture(reply);
        Ok(())
    }

    fn handle_event(&mut self, event: &mut WifiEvent<'_>) -> Result<EventStatus> {
        event.parse()?;
        self.vendor_id = event.vendor_id();
        self.subcmd = event.vendor_subcmd();
        self.capture(event);
        Ok(EventStatus::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nl80211::{NL80211_ATTR_IFINDEX, NL80211_ATTR_VENDOR_DATA, qca};
    use crate::testing::vendor_message;

    #[test]
    fn test_create_frames_vendor_header() {
        let mut cmd = VendorCommand::new(0x1c, Some(4), qca::OUI_QCA, qca::subcmd::NO_DFS_FLAG);
        cmd.create().unwrap();
        let msg = cmd.request_mut().take_message().unwrap().finish();

        let mut ev = WifiEvent::new(&msg);
        ev.parse().unwrap();
        assert_eq!(ev.cmd(), NL80211_CMD_VENDOR);
        assert_eq!(ev.vendor_id(), qca::OUI_QCA);
        assert_eq!(ev.vendor_subcmd(), qca::subcmd::NO_DFS_FLAG);
        assert_eq!(ev.get_u32(NL80211_ATTR_IFINDEX), 4);
    }

    #[test]
    fn test_event_overwrites_vendor_ids() {
        let mut cmd = VendorCommand::new(0x1c, None, qca::OUI_QCA, 1);
        let msg = vendor_message(0x1c, 0x0090_4c, 9, |b| b.append_attr_u32(1, 5));
        let mut ev = WifiEvent::new(&msg);

        assert_eq!(cmd.handle_event(&mut ev).unwrap(), EventStatus::Complete);
        assert_eq!(cmd.vendor_id(), 0x0090_4c);
        assert_eq!(cmd.subcmd(), 9);
        assert!(cmd.vendor_data().is_some());
    }

    #[test]
    fn test_response_without_vendor_data() {
        let mut cmd = VendorCommand::new(0x1c, None, qca::OUI_QCA, 1);
        let msg = crate::testing::genl_message(0x1c, NL80211_CMD_VENDOR, |b| {
            b.append_attr_u32(NL80211_ATTR_VENDOR_ID, qca::OUI_QCA)
        });
        let mut ev = WifiEvent::new(&msg);
        cmd.handle_response(&mut ev).unwrap();
        assert!(cmd.vendor_data().is_none());
        assert!(ev.get_attribute(NL80211_ATTR_VENDOR_DATA).is_none());
    }
}
