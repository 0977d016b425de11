//! nl80211 and QCA vendor protocol constants.
//!
//! Only the subset the HAL core speaks is listed. Values follow
//! `linux/nl80211.h` and the QCA vendor command header.

/// nl80211 generic netlink family name.
pub const NL80211_FAMILY: &str = "nl80211";
/// cld80211 (QCA diagnostic) generic netlink family name.
pub const CLD80211_FAMILY: &str = "cld80211";

/// nl80211 multicast groups joined on the event socket.
pub const NL80211_GROUPS: &[&str] = &["scan", "mlme", "regulatory", "vendor"];

/// cld80211 multicast groups joined on the diag socket.
pub const CLD80211_GROUPS: &[&str] = &[
    "host_logs",
    "fw_logs",
    "per_pkt_stats",
    "diag_events",
    "fatal_events",
];
/// cld80211 group carrying OEM messages; joined only with a control socket.
pub const CLD80211_OEM_GROUP: &str = "oem_msgs";

/// NETLINK_USERSOCK group used when cld80211 is unavailable.
pub const USERSOCK_DIAG_GROUP: u32 = 1;

// nl80211 commands
pub const NL80211_CMD_SET_WIPHY: u8 = 2;
pub const NL80211_CMD_GET_INTERFACE: u8 = 5;
pub const NL80211_CMD_TRIGGER_SCAN: u8 = 33;
pub const NL80211_CMD_NEW_SCAN_RESULTS: u8 = 34;
pub const NL80211_CMD_REGISTER_FRAME: u8 = 58;
/// Alias for [`NL80211_CMD_REGISTER_FRAME`].
pub const NL80211_CMD_REGISTER_ACTION: u8 = NL80211_CMD_REGISTER_FRAME;
pub const NL80211_CMD_FRAME: u8 = 59;
pub const NL80211_CMD_VENDOR: u8 = 103;

// nl80211 attributes
pub const NL80211_ATTR_WIPHY: u16 = 1;
pub const NL80211_ATTR_IFINDEX: u16 = 3;
pub const NL80211_ATTR_IFNAME: u16 = 4;
pub const NL80211_ATTR_MAC: u16 = 6;
pub const NL80211_ATTR_FRAME: u16 = 51;
pub const NL80211_ATTR_FRAME_MATCH: u16 = 91;
pub const NL80211_ATTR_FRAME_TYPE: u16 = 101;
pub const NL80211_ATTR_VENDOR_ID: u16 = 195;
pub const NL80211_ATTR_VENDOR_SUBCMD: u16 = 196;
pub const NL80211_ATTR_VENDOR_DATA: u16 = 197;

/// Size of the 802.11 management header preceding an action frame body.
pub const IEEE80211_HDR_LEN: usize = 24;

/// Short name for an nl80211 command, for logs.
pub fn cmd_name(cmd: u8) -> &'static str {
    match cmd {
        NL80211_CMD_SET_WIPHY => "SET_WIPHY",
        NL80211_CMD_GET_INTERFACE => "GET_INTERFACE",
        NL80211_CMD_TRIGGER_SCAN => "TRIGGER_SCAN",
        NL80211_CMD_NEW_SCAN_RESULTS => "NEW_SCAN_RESULTS",
        NL80211_CMD_REGISTER_FRAME => "REGISTER_FRAME",
        NL80211_CMD_FRAME => "FRAME",
        NL80211_CMD_VENDOR => "VENDOR",
        _ => "UNKNOWN",
    }
}

/// QCA vendor command space.
pub mod qca {
    /// Qualcomm Atheros OUI.
    pub const OUI_QCA: u32 = 0x00_1374;

    /// cld80211 command carrying OEM data.
    pub const WLAN_NL_MSG_OEM: u8 = 0x13;

    /// Vendor sub-commands.
    pub mod subcmd {
        pub const GSCAN_GET_CAPABILITIES: u32 = 23;
        pub const GSCAN_FULL_SCAN_RESULT: u32 = 26;
        pub const GET_SUPPORTED_FEATURES: u32 = 38;
        pub const NO_DFS_FLAG: u32 = 40;
        pub const GET_CONCURRENCY_MATRIX: u32 = 42;
        pub const GET_FEATURES: u32 = 55;
        pub const OFFLOADED_PACKETS: u32 = 79;
        pub const MONITOR_RSSI: u32 = 80;
        pub const ND_OFFLOAD: u32 = 82;
        pub const PACKET_FILTER: u32 = 83;
        pub const GET_BUS_SIZE: u32 = 84;
    }

    /// Vendor data attributes, grouped by sub-command.
    pub mod attr {
        pub const FEATURE_SET: u16 = 1;
        pub const FEATURE_FLAGS: u16 = 1;
        pub const DRV_INFO_BUS_SIZE: u16 = 1;
        pub const SET_NO_DFS_FLAG: u16 = 1;
        pub const ND_OFFLOAD_FLAG: u16 = 1;

        pub mod concurrency {
            pub const CONFIG_PARAM_SET_SIZE_MAX: u16 = 1;
            pub const RESULTS_SET_SIZE: u16 = 2;
            pub const RESULTS_SET: u16 = 3;
        }

        pub mod packet_filter {
            pub const SUB_CMD: u16 = 1;
            pub const VERSION: u16 = 2;
            pub const ID: u16 = 3;
            pub const SIZE: u16 = 4;
            pub const CURRENT_OFFSET: u16 = 5;
            pub const PROGRAM: u16 = 6;
            pub const PROG_LENGTH: u16 = 7;

            pub const SET: u32 = 0;
            pub const GET: u32 = 1;
            pub const WRITE: u32 = 2;
            pub const READ: u32 = 3;
            pub const ENABLE: u32 = 4;
            pub const DISABLE: u32 = 5;
        }

        pub mod offloaded_packets {
            pub const SENDING_CONTROL: u16 = 1;
            pub const REQUEST_ID: u16 = 2;
            pub const IP_PACKET_DATA: u16 = 3;
            pub const SRC_MAC_ADDR: u16 = 4;
            pub const DST_MAC_ADDR: u16 = 5;
            pub const PERIOD: u16 = 6;
            pub const ETHER_PROTO_TYPE: u16 = 7;

            pub const SENDING_START: u32 = 1;
            pub const SENDING_STOP: u32 = 2;
        }
    }
}
