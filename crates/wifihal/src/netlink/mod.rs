//! Async generic netlink plumbing.
//!
//! Wire-level pieces the rest of the HAL is built on: message and attribute
//! codecs, a builder, the async socket, and family resolution.

pub mod attr;
pub mod builder;
pub mod genl;
pub mod message;
pub mod socket;

pub use attr::{AttrIter, AttrTable};
pub use builder::{MessageBuilder, NestToken};
pub use message::{MessageIter, NlMessage, NlMsgError, NlMsgHdr, NlMsgType};
pub use socket::{NetlinkSocket, Protocol};
