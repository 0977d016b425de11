//! Command lifecycle.
//!
//! A command owns one [`WifiRequest`]. It is sent either with
//! [`CommandChannel::request_response`], which completes when the kernel
//! acknowledges the request, or [`CommandChannel::request_event`], which also
//! waits for an asynchronous event delivered through the [`Registry`].
//!
//! ```ignore
//! use wifihal::command::{VendorCommand, WifiCommand};
//! use wifihal::nl80211::{NL80211_ATTR_VENDOR_DATA, qca};
//!
//! let mut cmd = VendorCommand::new(family, Some(ifindex), qca::OUI_QCA, qca::subcmd::NO_DFS_FLAG);
//! cmd.create()?;
//! let nest = cmd.request_mut().attr_start(NL80211_ATTR_VENDOR_DATA)?;
//! cmd.request_mut().put_u32(qca::attr::SET_NO_DFS_FLAG, 1)?;
//! cmd.request_mut().attr_end(nest)?;
//! channel.request_response(&mut cmd).await?;
//! ```
//!
//! [`Registry`]: crate::registry::Registry

mod channel;
pub mod event;
pub mod generic;
pub mod request;
pub mod vendor;

pub use channel::CommandChannel;
pub use event::{OwnedEvent, WifiEvent};
pub use generic::{GenericCommand, GenericReply};
pub use request::WifiRequest;
pub use vendor::VendorCommand;

use rand::Rng;

use crate::error::{Error, Result};

/// Identifies a request towards the driver.
pub type RequestId = i32;

/// Generate a request id in `[1, 1000]` for callers that did not supply one.
pub fn next_request_id() -> RequestId {
    rand::thread_rng().gen_range(1..=1000)
}

/// Outcome of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    /// The command has what it waited for.
    Complete,
    /// Keep waiting.
    Pending,
}

/// Where a command is in its request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandState {
    #[default]
    Idle,
    Created,
    Sent,
    ResponseReceived,
    EventReceived,
    TimedOut,
    Failed,
}

/// State shared by every command implementation.
#[derive(Debug, Default)]
pub struct CommandCore {
    request: WifiRequest,
    id: RequestId,
    state: CommandState,
}

impl CommandCore {
    /// Core with an empty request.
    pub fn new(id: RequestId) -> Self {
        Self {
            request: WifiRequest::default(),
            id,
            state: CommandState::Idle,
        }
    }

    /// Core with a request size limit.
    pub fn with_max_size(id: RequestId, max_size: usize) -> Self {
        Self {
            request: WifiRequest::new(max_size),
            id,
            state: CommandState::Idle,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    pub fn request(&self) -> &WifiRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut WifiRequest {
        &mut self.request
    }

    pub(crate) fn set_state(&mut self, state: CommandState) {
        self.state = state;
    }
}

/// A request towards the driver and the handling of what comes back.
pub trait WifiCommand: Send {
    fn core(&self) -> &CommandCore;

    fn core_mut(&mut self) -> &mut CommandCore;

    /// Build the request message.
    fn create(&mut self) -> Result<()> {
        Err(Error::NotSupported("command has no request builder".into()))
    }

    /// Handle a reply on the command socket.
    fn handle_response(&mut self, reply: &mut WifiEvent<'_>) -> Result<()> {
        tracing::trace!(cmd = reply.cmd(), "skipping response");
        Ok(())
    }

    /// Handle an event delivered by the event loop.
    fn handle_event(&mut self, event: &mut WifiEvent<'_>) -> Result<EventStatus> {
        tracing::trace!(cmd = event.cmd(), "skipping event");
        Ok(EventStatus::Complete)
    }

    /// Abort an outstanding request.
    fn cancel(&mut self) -> Result<()> {
        Err(Error::NotSupported("command cannot be cancelled".into()))
    }

    fn id(&self) -> RequestId {
        self.core().id()
    }

    fn state(&self) -> CommandState {
        self.core().state()
    }

    fn request_mut(&mut self) -> &mut WifiRequest {
        self.core_mut().request_mut()
    }
}
