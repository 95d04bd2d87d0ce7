//! Listener registry: at most one live binding per `(kind, channel, event)`.

use std::collections::HashMap;
use std::sync::Mutex;

use pulseboard_shared::{ChannelKind, SubscriptionKey};

use crate::connection::{Connection, ConnectionId, ConnectionSlot};
use crate::transport::{lock, EventCallback, ListenerId};

/// Returned by [`ListenerRegistry::subscribe`]. Holding it keeps nothing
/// alive; stop a subscription through the registry or a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    key: SubscriptionKey,
    listener: ListenerId,
    connection: ConnectionId,
}

impl SubscriptionHandle {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }
}

struct Subscription {
    listener: ListenerId,
    connection: ConnectionId,
}

pub struct ListenerRegistry {
    slot: ConnectionSlot,
    entries: Mutex<HashMap<SubscriptionKey, Subscription>>,
}

impl ListenerRegistry {
    pub(crate) fn new(slot: ConnectionSlot) -> Self {
        Self {
            slot,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn connection(&self) -> Option<Connection> {
        lock(&self.slot).clone().filter(Connection::is_usable)
    }

    /// Bind `callback` to `event` on `channel`, replacing any earlier binding
    /// for the same key. `None` when there is no connection or a name is
    /// invalid.
    pub fn subscribe(
        &self,
        kind: ChannelKind,
        channel: &str,
        event: &str,
        callback: EventCallback,
    ) -> Option<SubscriptionHandle> {
        let Some(key) = SubscriptionKey::new(kind, channel, event) else {
            tracing::warn!("refusing subscription with invalid names {:?}/{:?}", channel, event);
            return None;
        };
        let connection = self.connection()?;
        let transport = connection.transport();

        // Held across replace so concurrent subscribes to one key cannot both
        // leave a listener behind. Transport calls here never run callbacks.
        let mut entries = lock(&self.entries);
        if let Some(previous) = entries.remove(&key) {
            if previous.connection == connection.id() {
                transport.stop_listening(kind, channel, event, previous.listener);
            }
            tracing::debug!("replacing subscription {}", key);
        }

        let listener = transport.listen(kind, channel, event, callback);
        entries.insert(
            key.clone(),
            Subscription {
                listener,
                connection: connection.id(),
            },
        );
        tracing::debug!("subscribed {}", key);

        Some(SubscriptionHandle {
            key,
            listener,
            connection: connection.id(),
        })
    }

    /// With `event`, remove that binding on both the public and private
    /// channel. Without it, remove every binding on the channel and leave the
    /// channel on the transport.
    pub fn unsubscribe(&self, channel: &str, event: Option<&str>) {
        let connection = self.connection();
        let mut entries = lock(&self.entries);

        let keys: Vec<SubscriptionKey> = match event {
            Some(event) => ChannelKind::ALL
                .iter()
                .filter_map(|kind| SubscriptionKey::new(*kind, channel, event))
                .filter(|key| entries.contains_key(key))
                .collect(),
            None => entries
                .keys()
                .filter(|key| key.channel() == channel)
                .cloned()
                .collect(),
        };

        for key in keys {
            if let Some(subscription) = entries.remove(&key) {
                release(connection.as_ref(), &key, &subscription);
                tracing::debug!("unsubscribed {}", key);
            }
        }

        if event.is_none() {
            if let Some(connection) = connection.as_ref() {
                for kind in ChannelKind::ALL {
                    connection.transport().leave(kind, channel);
                }
            }
        }
    }

    /// Remove every binding.
    pub fn clear(&self) {
        let connection = self.connection();
        self.release_all(connection.as_ref());
    }

    pub(crate) fn release_all(&self, connection: Option<&Connection>) {
        let drained: Vec<_> = lock(&self.entries).drain().collect();
        for (key, subscription) in &drained {
            release(connection, key, subscription);
        }
        if !drained.is_empty() {
            tracing::debug!("released {} subscriptions", drained.len());
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        lock(&self.entries).contains_key(key)
    }

    pub fn keys(&self) -> Vec<SubscriptionKey> {
        lock(&self.entries).keys().cloned().collect()
    }
}

fn release(connection: Option<&Connection>, key: &SubscriptionKey, subscription: &Subscription) {
    if let Some(connection) = connection.filter(|c| c.id() == subscription.connection) {
        connection.transport().stop_listening(
            key.kind(),
            key.channel(),
            key.event(),
            subscription.listener,
        );
    }
}
