//! Command socket round trips.

use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use super::event::WifiEvent;
use super::{CommandState, EventStatus, WifiCommand};
use crate::error::{Error, Result};
use crate::netlink::genl::{FamilyInfo, query_family};
use crate::netlink::message::{MessageIter, NLM_F_ACK, NLM_F_REQUEST, NlMsgError};
use crate::netlink::socket::NetlinkSocket;
use crate::nl80211::cmd_name;
use crate::registry::{HandlerKey, Registry};

/// The command socket.
///
/// One round trip runs at a time; the socket lock is held from send until
/// the kernel's ACK or error, so concurrent callers never read each other's
/// replies.
#[derive(Debug)]
pub struct CommandChannel {
    socket: Mutex<NetlinkSocket>,
}

impl CommandChannel {
    pub fn new(socket: NetlinkSocket) -> Self {
        Self {
            socket: Mutex::new(socket),
        }
    }

    /// Resolve a generic netlink family over the command socket.
    pub async fn resolve_family(&self, name: &str) -> Result<FamilyInfo> {
        let socket = self.socket.lock().await;
        query_family(&socket, name).await
    }

    /// Send the command's request and process replies until ACK, error or DONE.
    ///
    /// `create()` is invoked only if the request has not been built yet, so
    /// attributes added after an explicit `create()` are kept. The request
    /// buffer is released whatever the outcome.
    pub async fn request_response<C>(&self, cmd: &mut C) -> Result<()>
    where
        C: WifiCommand + ?Sized,
    {
        if !cmd.core().request().is_created() {
            cmd.create()?;
        }
        cmd.core_mut().set_state(CommandState::Created);

        let result = self.round_trip(cmd).await;
        cmd.core_mut().request_mut().destroy();
        cmd.core_mut().set_state(match result {
            Ok(()) => CommandState::ResponseReceived,
            Err(_) => CommandState::Failed,
        });
        result
    }

    async fn round_trip<C>(&self, cmd: &mut C) -> Result<()>
    where
        C: WifiCommand + ?Sized,
    {
        let mut msg = cmd.core_mut().request_mut().take_message()?;
        let name = cmd_name(cmd.core().request().cmd());

        let socket = self.socket.lock().await;
        msg.set_flags(msg.flags() | NLM_F_REQUEST | NLM_F_ACK);
        msg.set_seq(socket.next_seq());
        msg.set_pid(socket.pid());
        socket.send(&msg.finish()).await?;
        cmd.core_mut().set_state(CommandState::Sent);

        // Sequence numbers are not checked: the socket only carries our own
        // round trips, serialized by the lock. Replies are drained up to the
        // ACK even after one fails to decode.
        let mut failed = None;
        loop {
            let data = socket.recv_msg().await?;
            for msg in MessageIter::new(&data) {
                let msg = msg?;

                if msg.header.is_error() {
                    let err = NlMsgError::from_bytes(msg.payload)?;
                    if !err.is_ack() {
                        tracing::debug!(cmd = name, errno = err.error, "request failed");
                        return Err(Error::from_errno(err.error).with_context(name));
                    }
                    return failed.map_or(Ok(()), Err);
                }

                if msg.header.is_done() {
                    return failed.map_or(Ok(()), Err);
                }

                if msg.header.is_control() || failed.is_some() {
                    continue;
                }

                let mut reply = WifiEvent::new(msg.raw);
                if let Err(e) = reply.parse().and_then(|()| cmd.handle_response(&mut reply)) {
                    tracing::debug!(cmd = name, error = %e, "bad reply");
                    failed = Some(e);
                }
            }
        }
    }

    /// Send the command and wait for an asynchronous event under `key`.
    ///
    /// The handler is registered before sending and removed on every exit
    /// path. Events are handed to `handle_event` until it reports
    /// [`EventStatus::Complete`]. With a `deadline`, waiting longer fails
    /// with [`Error::TimedOut`]; without one the wait lasts until completion
    /// or HAL cleanup.
    pub async fn request_event<C>(
        &self,
        registry: &Registry,
        cmd: &mut C,
        key: HandlerKey,
        deadline: Option<Duration>,
    ) -> Result<()>
    where
        C: WifiCommand + ?Sized,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _guard = registry.register_scoped(key, move |event| {
            let _ = tx.send(event.to_owned_event());
        });

        self.request_response(cmd).await?;

        let wait = async {
            loop {
                // The registry drops our sender when the HAL is cleaned up.
                let owned = rx.recv().await.ok_or(Error::Uninitialized)?;
                let mut event = owned.event()?;
                if cmd.handle_event(&mut event)? == EventStatus::Complete {
                    break;
                }
            }
            Ok::<(), Error>(())
        };

        let result = match deadline {
            Some(deadline) => tokio::time::timeout(deadline, wait)
                .await
                .unwrap_or(Err(Error::TimedOut)),
            None => wait.await,
        };

        cmd.core_mut().set_state(match &result {
            Ok(()) => CommandState::EventReceived,
            Err(Error::TimedOut) => CommandState::TimedOut,
            Err(_) => CommandState::Failed,
        });
        if matches!(result, Err(Error::TimedOut)) {
            tracing::warn!(?key, id = cmd.id(), "timed out waiting for event");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandCore, next_request_id};
    use crate::error::WifiError;
    use crate::nl80211::{NL80211_ATTR_VENDOR_DATA, NL80211_CMD_VENDOR, qca};
    use crate::testing::{FakeKernel, genl_message, vendor_message};
    use std::sync::Arc;

    const FAMILY: u16 = 0x1c;

    struct TestCommand {
        core: CommandCore,
        fail_create: bool,
        reject_responses: bool,
        responses: usize,
        events: Vec<u32>,
        need_events: usize,
    }

    impl TestCommand {
        fn new() -> Self {
            Self {
                core: CommandCore::new(next_request_id()),
                fail_create: false,
                reject_responses: false,
                responses: 0,
                events: Vec::new(),
                need_events: 1,
            }
        }
    }

    impl WifiCommand for TestCommand {
        fn core(&self) -> &CommandCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut CommandCore {
            &mut self.core
        }
        fn create(&mut self) -> Result<()> {
            if self.fail_create {
                return Err(Error::InvalidArgs("create refused".into()));
            }
            self.core.request_mut().create(FAMILY, NL80211_CMD_VENDOR, 0, 0)
        }
        fn handle_response(&mut self, _reply: &mut WifiEvent<'_>) -> Result<()> {
            self.responses += 1;
            if self.reject_responses {
                return Err(Error::InvalidMessage("reply is missing results".into()));
            }
            Ok(())
        }
        fn handle_event(&mut self, event: &mut WifiEvent<'_>) -> Result<EventStatus> {
            let value = event
                .get_nested(NL80211_ATTR_VENDOR_DATA)?
                .map_or(0, |data| data.u32(1));
            self.events.push(value);
            if self.events.len() >= self.need_events {
                Ok(EventStatus::Complete)
            } else {
                Ok(EventStatus::Pending)
            }
        }
    }

    #[tokio::test]
    async fn test_create_failure_sends_nothing() {
        let (socket, kernel) = FakeKernel::pair(100).unwrap();
        let channel = CommandChannel::new(socket);

        let mut cmd = TestCommand::new();
        cmd.fail_create = true;
        let err = channel.request_response(&mut cmd).await.unwrap_err();
        assert_eq!(err.status(), WifiError::InvalidArgs);
        assert!(kernel.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_ack_completes() {
        let (socket, kernel) = FakeKernel::pair(100).unwrap();
        let channel = CommandChannel::new(socket);

        let kernel_task = tokio::spawn(async move {
            let req = kernel.recv().await.unwrap();
            kernel
                .send(&genl_message(FAMILY, NL80211_CMD_VENDOR, |_| {}))
                .await
                .unwrap();
            kernel.ack(&req, 0).await.unwrap();
            req
        });

        let mut cmd = TestCommand::new();
        channel.request_response(&mut cmd).await.unwrap();
        assert_eq!(cmd.responses, 1);
        assert_eq!(cmd.state(), CommandState::ResponseReceived);
        assert!(!cmd.core().request().is_created());

        let req = kernel_task.await.unwrap();
        let hdr = crate::netlink::NlMsgHdr::from_bytes(&req).unwrap();
        assert_eq!(hdr.nlmsg_flags & (NLM_F_REQUEST | NLM_F_ACK), NLM_F_REQUEST | NLM_F_ACK);
        assert_eq!(hdr.nlmsg_pid, 100);
    }

    #[tokio::test]
    async fn test_kernel_error_is_mapped() {
        let (socket, kernel) = FakeKernel::pair(100).unwrap();
        let channel = CommandChannel::new(socket);

        tokio::spawn(async move {
            let req = kernel.recv().await.unwrap();
            kernel.ack(&req, -libc::EOPNOTSUPP).await.unwrap();
        });

        let mut cmd = TestCommand::new();
        let err = channel.request_response(&mut cmd).await.unwrap_err();
        assert_eq!(err.status(), WifiError::NotSupported);
        assert_eq!(cmd.state(), CommandState::Failed);
    }

    #[tokio::test]
    async fn test_bad_reply_drains_to_ack() {
        let (socket, kernel) = FakeKernel::pair(100).unwrap();
        let channel = CommandChannel::new(socket);

        tokio::spawn(async move {
            let req = kernel.recv().await.unwrap();
            for _ in 0..2 {
                kernel
                    .send(&genl_message(FAMILY, NL80211_CMD_VENDOR, |_| {}))
                    .await
                    .unwrap();
            }
            kernel.ack(&req, 0).await.unwrap();

            let req = kernel.recv().await.unwrap();
            kernel.ack(&req, -libc::EBUSY).await.unwrap();
        });

        let mut cmd = TestCommand::new();
        cmd.reject_responses = true;
        let err = channel.request_response(&mut cmd).await.unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
        // Only the first reply reaches the handler.
        assert_eq!(cmd.responses, 1);
        assert_eq!(cmd.state(), CommandState::Failed);

        // The next round trip sees its own answer, not the stale ACK.
        let mut next = TestCommand::new();
        let err = channel.request_response(&mut next).await.unwrap_err();
        assert_eq!(err.status(), WifiError::Busy);
        assert_eq!(next.responses, 0);
    }

    #[tokio::test]
    async fn test_kernel_error_wins_over_bad_reply() {
        let (socket, kernel) = FakeKernel::pair(100).unwrap();
        let channel = CommandChannel::new(socket);

        tokio::spawn(async move {
            let req = kernel.recv().await.unwrap();
            kernel
                .send(&genl_message(FAMILY, NL80211_CMD_VENDOR, |_| {}))
                .await
                .unwrap();
            kernel.ack(&req, -libc::EINVAL).await.unwrap();
        });

        let mut cmd = TestCommand::new();
        cmd.reject_responses = true;
        let err = channel.request_response(&mut cmd).await.unwrap_err();
        assert_eq!(err.status(), WifiError::InvalidArgs);
        assert_eq!(err.errno(), Some(libc::EINVAL));
    }

    #[tokio::test]
    async fn test_request_is_single_use() {
        let (socket, kernel) = FakeKernel::pair(100).unwrap();
        let channel = CommandChannel::new(socket);

        tokio::spawn(async move {
            for _ in 0..2 {
                let req = kernel.recv().await.unwrap();
                kernel.ack(&req, 0).await.unwrap();
            }
        });

        let mut cmd = TestCommand::new();
        channel.request_response(&mut cmd).await.unwrap();
        // Second send re-creates the request.
        channel.request_response(&mut cmd).await.unwrap();
        assert_eq!(cmd.state(), CommandState::ResponseReceived);
    }

    #[tokio::test]
    async fn test_request_event_completes() {
        let (socket, kernel) = FakeKernel::pair(100).unwrap();
        let channel = CommandChannel::new(socket);
        let registry = Registry::new();
        let key = HandlerKey::vendor(qca::OUI_QCA, qca::subcmd::MONITOR_RSSI);

        let loop_registry = registry.clone();
        tokio::spawn(async move {
            let req = kernel.recv().await.unwrap();
            kernel.ack(&req, 0).await.unwrap();
            // Stand in for the event loop.
            for value in [10u32, 20] {
                let msg = vendor_message(FAMILY, qca::OUI_QCA, qca::subcmd::MONITOR_RSSI, |b| {
                    b.append_attr_u32(1, value)
                });
                let mut ev = WifiEvent::new(&msg);
                ev.parse().unwrap();
                while !loop_registry.dispatch(&ev) {
                    tokio::task::yield_now().await;
                }
            }
        });

        let mut cmd = TestCommand::new();
        cmd.need_events = 2;
        channel
            .request_event(&registry, &mut cmd, key, Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(cmd.events, vec![10, 20]);
        assert_eq!(cmd.state(), CommandState::EventReceived);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_request_event_timeout_unregisters() {
        let (socket, kernel) = FakeKernel::pair(100).unwrap();
        let channel = CommandChannel::new(socket);
        let registry = Registry::new();
        let key = HandlerKey::vendor(qca::OUI_QCA, qca::subcmd::MONITOR_RSSI);

        let kernel = Arc::new(kernel);
        let k = Arc::clone(&kernel);
        tokio::spawn(async move {
            let req = k.recv().await.unwrap();
            k.ack(&req, 0).await.unwrap();
        });

        let mut cmd = TestCommand::new();
        let err = channel
            .request_event(&registry, &mut cmd, key, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err.status(), WifiError::TimedOut);
        assert_eq!(cmd.state(), CommandState::TimedOut);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_request_event_send_failure_unregisters() {
        let (socket, kernel) = FakeKernel::pair(100).unwrap();
        let channel = CommandChannel::new(socket);
        let registry = Registry::new();

        tokio::spawn(async move {
            let req = kernel.recv().await.unwrap();
            kernel.ack(&req, -libc::EBUSY).await.unwrap();
        });

        let mut cmd = TestCommand::new();
        let err = channel
            .request_event(&registry, &mut cmd, HandlerKey::Command(59), None)
            .await
            .unwrap_err();
        assert_eq!(err.status(), WifiError::Busy);
        assert!(registry.is_empty());
    }
}
