//! Event handler registry.
//!
//! Handlers are keyed by nl80211 command, or by (vendor id, subcmd) for
//! `NL80211_CMD_VENDOR` events. Several handlers may share a key; an event
//! is delivered to the first one registered. Callbacks run with the
//! registry unlocked, so they may register or unregister handlers.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::command::event::{OwnedEvent, WifiEvent};
use crate::nl80211::NL80211_CMD_VENDOR;

/// Dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKey {
    /// Any non-vendor nl80211 command.
    Command(u8),
    /// An `NL80211_CMD_VENDOR` event with this vendor id and subcmd.
    Vendor { vendor_id: u32, subcmd: u32 },
}

impl HandlerKey {
    /// Vendor key shorthand.
    pub fn vendor(vendor_id: u32, subcmd: u32) -> Self {
        Self::Vendor { vendor_id, subcmd }
    }

    /// Key an event dispatches under.
    pub fn for_event(event: &WifiEvent<'_>) -> Self {
        if event.cmd() == NL80211_CMD_VENDOR {
            Self::Vendor {
                vendor_id: event.vendor_id(),
                subcmd: event.vendor_subcmd(),
            }
        } else {
            Self::Command(event.cmd())
        }
    }
}

/// Handler callback.
pub type EventCallback = Arc<dyn Fn(&WifiEvent<'_>) + Send + Sync>;

/// Identifies one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

struct Registration {
    id: HandlerId,
    callback: EventCallback,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    handlers: HashMap<HandlerKey, Vec<Registration>>,
}

/// Shared handler registry.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<Mutex<Inner>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a handler that stays until explicitly unregistered.
    pub fn register<F>(&self, key: HandlerKey, callback: F) -> HandlerId
    where
        F: Fn(&WifiEvent<'_>) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = HandlerId(inner.next_id);
        inner.handlers.entry(key).or_default().push(Registration {
            id,
            callback: Arc::new(callback),
        });
        tracing::debug!(?key, ?id, "registered event handler");
        id
    }

    /// Register a handler that is removed when the returned guard drops.
    pub fn register_scoped<F>(&self, key: HandlerKey, callback: F) -> HandlerGuard
    where
        F: Fn(&WifiEvent<'_>) + Send + Sync + 'static,
    {
        let id = self.register(key, callback);
        HandlerGuard {
            registry: self.clone(),
            key,
            id,
        }
    }

    /// Remove the first handler registered for `key`. No-op when none is.
    pub fn unregister(&self, key: HandlerKey) -> bool {
        let mut inner = self.lock();
        let Some(list) = inner.handlers.get_mut(&key) else {
            return false;
        };
        list.remove(0);
        if list.is_empty() {
            inner.handlers.remove(&key);
        }
        tracing::debug!(?key, "unregistered event handler");
        true
    }

    /// Remove one specific registration.
    pub fn unregister_id(&self, key: HandlerKey, id: HandlerId) -> bool {
        let mut inner = self.lock();
        let Some(list) = inner.handlers.get_mut(&key) else {
            return false;
        };
        let Some(pos) = list.iter().position(|r| r.id == id) else {
            return false;
        };
        list.remove(pos);
        if list.is_empty() {
            inner.handlers.remove(&key);
        }
        true
    }

    /// Deliver an event to the first handler for its key.
    ///
    /// Returns whether a handler ran.
    pub fn dispatch(&self, event: &WifiEvent<'_>) -> bool {
        let key = HandlerKey::for_event(event);
        let callback = {
            let inner = self.lock();
            inner
                .handlers
                .get(&key)
                .and_then(|list| list.first())
                .map(|r| Arc::clone(&r.callback))
        };

        match callback {
            Some(callback) => {
                callback(event);
                true
            }
            None => {
                tracing::trace!(?key, "event ignored");
                false
            }
        }
    }

    /// Receive every event for `key` as a stream until it is dropped.
    pub fn subscribe(&self, key: HandlerKey) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let guard = self.register_scoped(key, move |event| {
            let _ = tx.send(event.to_owned_event());
        });
        EventSubscription {
            events: UnboundedReceiverStream::new(rx),
            _guard: guard,
        }
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.lock().handlers.values().map(Vec::len).sum()
    }

    /// Check whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every registration, returning how many there were.
    ///
    /// Dropping the callbacks closes any channels they captured, which
    /// wakes tasks waiting on them.
    pub fn clear(&self) -> usize {
        let handlers = std::mem::take(&mut self.lock().handlers);
        handlers.values().map(Vec::len).sum()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("handlers", &self.len())
            .finish()
    }
}

/// Unregisters its handler on drop.
#[must_use = "the handler is unregistered when the guard is dropped"]
pub struct HandlerGuard {
    registry: Registry,
    key: HandlerKey,
    id: HandlerId,
}

impl HandlerGuard {
    pub fn key(&self) -> HandlerKey {
        self.key
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        self.registry.unregister_id(self.key, self.id);
    }
}

/// Stream of events for one key; unregisters on drop.
pub struct EventSubscription {
    events: UnboundedReceiverStream<OwnedEvent>,
    _guard: HandlerGuard,
}

impl Stream for EventSubscription {
    type Item = OwnedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}
