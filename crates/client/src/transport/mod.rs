//! Pub/sub transports behind the connection manager.
//!
//! A [`Connector`] opens a [`Transport`]; the transport owns the socket and a
//! table of per-(channel, event) callbacks. Two implementations ship:
//!
//! - [`PusherConnector`]: Pusher protocol over `tokio-tungstenite`, with
//!   private-channel authorization and native reconnect.
//! - [`LocalConnector`]: in-process delivery, no socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use pulseboard_shared::{ChannelKind, RealtimeError};
use serde_json::Value;
use tokio::sync::watch;

use crate::config::RealtimeConfig;
use crate::session::Credential;

mod auth;
mod local;
mod pusher;

pub use auth::ChannelAuthorizer;
pub use local::{LocalConnector, LocalTransport};
pub use pusher::{PusherConnector, PusherTransport};

/// Callback invoked with each event payload.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Transport-issued handle for one bound callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Connection state reported by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { reason: String },
}

impl TransportState {
    pub fn is_connected(&self) -> bool {
        matches!(self, TransportState::Connected)
    }

    /// The transport gave up; it will not reconnect on its own.
    pub fn is_failed(&self) -> bool {
        matches!(self, TransportState::Failed { .. })
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            TransportState::Connecting | TransportState::Reconnecting { .. }
        )
    }
}

/// A live pub/sub connection.
///
/// `listen`/`stop_listening`/`leave` are synchronous: they update local
/// bookkeeping and schedule any socket work. None of them invoke callbacks.
pub trait Transport: Send + Sync {
    fn listen(
        &self,
        kind: ChannelKind,
        channel: &str,
        event: &str,
        callback: EventCallback,
    ) -> ListenerId;

    fn stop_listening(&self, kind: ChannelKind, channel: &str, event: &str, id: ListenerId);

    /// Drop every callback on the channel and unsubscribe from it.
    fn leave(&self, kind: ChannelKind, channel: &str);

    /// Close the connection. Callbacks are released.
    fn disconnect(&self);

    fn state(&self) -> watch::Receiver<TransportState>;
}

/// Opens transports. Must not block: socket I/O happens in the background.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        config: &RealtimeConfig,
        credential: &Credential,
    ) -> Result<Arc<dyn Transport>, RealtimeError>;
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type EventListeners = HashMap<String, Vec<(ListenerId, EventCallback)>>;

/// Callbacks keyed by wire channel name, then event name.
#[derive(Default)]
pub(crate) struct ListenerTable {
    channels: Mutex<HashMap<String, EventListeners>>,
    next_id: AtomicU64,
}

impl ListenerTable {
    /// Returns the new id and whether this is the channel's first listener.
    pub(crate) fn add(&self, wire: &str, event: &str, callback: EventCallback) -> (ListenerId, bool) {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut channels = lock(&self.channels);
        let first = !channels.contains_key(wire);
        channels
            .entry(wire.to_string())
            .or_default()
            .entry(event.to_string())
            .or_default()
            .push((id, callback));
        (id, first)
    }

    /// Returns `true` when the channel has no listeners left.
    pub(crate) fn remove(&self, wire: &str, event: &str, id: ListenerId) -> bool {
        let mut channels = lock(&self.channels);
        let Some(events) = channels.get_mut(wire) else {
            return false;
        };
        if let Some(listeners) = events.get_mut(event) {
            listeners.retain(|(listener, _)| *listener != id);
            if listeners.is_empty() {
                events.remove(event);
            }
        }
        if events.is_empty() {
            channels.remove(wire);
            return true;
        }
        false
    }

    /// Returns `true` when the channel had listeners.
    pub(crate) fn remove_channel(&self, wire: &str) -> bool {
        lock(&self.channels).remove(wire).is_some()
    }

    /// Snapshot of the callbacks for an event, so they can run unlocked.
    pub(crate) fn callbacks(&self, wire: &str, event: &str) -> Vec<EventCallback> {
        lock(&self.channels)
            .get(wire)
            .and_then(|events| events.get(event))
            .map(|listeners| listeners.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn channels(&self) -> Vec<String> {
        lock(&self.channels).keys().cloned().collect()
    }

    pub(crate) fn listener_count(&self) -> usize {
        lock(&self.channels)
            .values()
            .flat_map(|events| events.values())
            .map(Vec::len)
            .sum()
    }

    pub(crate) fn clear(&self) {
        lock(&self.channels).clear();
    }
}
