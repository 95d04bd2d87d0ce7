//! Process-wide realtime state: the connection manager plus requests parked
//! until a connection exists.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use pulseboard_shared::{ChannelKind, SubscriptionKey};

use crate::adapters::{Channels, Listening};
use crate::config::RealtimeConfig;
use crate::connection::{Connection, ConnectionManager};
use crate::registry::{ListenerRegistry, SubscriptionHandle};
use crate::session::Credential;
use crate::transport::{lock, Connector, EventCallback, PusherConnector};

/// Created once by the application and shared with the binder and adapters.
pub struct Realtime {
    manager: ConnectionManager,
    pending: Mutex<HashMap<SubscriptionKey, EventCallback>>,
}

impl Realtime {
    pub fn new(config: RealtimeConfig, connector: Option<Arc<dyn Connector>>) -> Arc<Self> {
        Arc::new(Self {
            manager: ConnectionManager::new(config, connector),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Realtime over the Pusher protocol.
    pub fn with_pusher(config: RealtimeConfig) -> Arc<Self> {
        let connector: Arc<dyn Connector> = Arc::new(PusherConnector::new());
        Self::new(config, Some(connector))
    }

    /// Realtime with no transport. Every request stays pending.
    pub fn detached(config: RealtimeConfig) -> Arc<Self> {
        Self::new(config, None)
    }

    pub fn config(&self) -> &RealtimeConfig {
        self.manager.config()
    }

    pub fn ensure_connection(&self, credential: Option<&Credential>) -> Option<Connection> {
        self.manager.ensure_connection(credential)
    }

    pub fn current_connection(&self) -> Option<Connection> {
        self.manager.current()
    }

    /// Drop parked requests and tear the connection down.
    pub fn teardown(&self) {
        let discarded = {
            let mut pending = lock(&self.pending);
            let n = pending.len();
            pending.clear();
            n
        };
        if discarded > 0 {
            tracing::debug!("discarded {} pending subscriptions", discarded);
        }
        self.manager.teardown();
    }

    pub fn registry(&self) -> &ListenerRegistry {
        self.manager.registry()
    }

    pub fn subscribe(
        &self,
        kind: ChannelKind,
        channel: &str,
        event: &str,
        callback: EventCallback,
    ) -> Option<SubscriptionHandle> {
        self.registry().subscribe(kind, channel, event, callback)
    }

    pub fn unsubscribe(&self, channel: &str, event: Option<&str>) {
        self.registry().unsubscribe(channel, event);
    }

    /// Typed channel adapters bound to this instance.
    pub fn channels(self: &Arc<Self>) -> Channels {
        Channels::new(self.clone())
    }

    /// Subscribe now, or park the request until the next `rearm`.
    pub(crate) fn listen(
        &self,
        kind: ChannelKind,
        channel: &str,
        event: &str,
        callback: EventCallback,
    ) -> Listening {
        let Some(key) = SubscriptionKey::new(kind, channel, event) else {
            tracing::warn!("rejected listener for {:?}/{:?}", channel, event);
            return Listening::Rejected;
        };

        if let Some(handle) = self.registry().subscribe(kind, channel, event, callback.clone()) {
            lock(&self.pending).remove(&key);
            return Listening::Active(handle);
        }

        tracing::debug!("no realtime connection yet; parking {}", key);
        lock(&self.pending).insert(key.clone(), callback);
        Listening::Pending(key)
    }

    /// Forget parked requests for `channel` and unsubscribe it.
    pub(crate) fn stop(&self, channel: &str) {
        lock(&self.pending).retain(|key, _| key.channel() != channel);
        self.unsubscribe(channel, None);
    }

    /// Subscribe every parked request. Requests that still cannot be bound
    /// stay parked. Returns how many became active.
    pub fn rearm(&self) -> usize {
        let parked: Vec<_> = lock(&self.pending).drain().collect();
        if parked.is_empty() {
            return 0;
        }

        let mut armed = 0;
        let mut still_parked = Vec::new();
        for (key, callback) in parked {
            match self
                .registry()
                .subscribe(key.kind(), key.channel(), key.event(), callback.clone())
            {
                Some(_) => armed += 1,
                None => still_parked.push((key, callback)),
            }
        }

        if !still_parked.is_empty() {
            let mut pending = lock(&self.pending);
            for (key, callback) in still_parked {
                // A newer request for the same key wins.
                pending.entry(key).or_insert(callback);
            }
        }

        tracing::info!("re-armed {} pending subscriptions", armed);
        armed
    }

    pub fn pending_len(&self) -> usize {
        lock(&self.pending).len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::transport::LocalConnector;

    fn realtime(connector: &Arc<LocalConnector>) -> Arc<Realtime> {
        let connector: Arc<dyn Connector> = connector.clone();
        Realtime::new(RealtimeConfig::new("app-key"), Some(connector))
    }

    fn noop() -> EventCallback {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn listen_parks_until_rearm() {
        let connector = Arc::new(LocalConnector::new());
        let rt = realtime(&connector);

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let outcome = rt.listen(
            ChannelKind::Public,
            "users",
            "users.reload",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(outcome.is_pending());
        assert_eq!(rt.pending_len(), 1);

        rt.ensure_connection(Some(&Credential::new("tok-123").unwrap()))
            .unwrap();
        assert_eq!(rt.rearm(), 1);
        assert_eq!(rt.rearm(), 0);
        assert_eq!(rt.pending_len(), 0);

        connector.last().unwrap().emit(
            ChannelKind::Public,
            "users",
            "users.reload",
            &serde_json::Value::Null,
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rearm_without_connection_keeps_requests_parked() {
        let connector = Arc::new(LocalConnector::new());
        let rt = realtime(&connector);
        rt.listen(ChannelKind::Public, "users", "users.reload", noop());
        assert_eq!(rt.rearm(), 0);
        assert_eq!(rt.pending_len(), 1);
    }

    #[tokio::test]
    async fn stop_discards_parked_requests() {
        let connector = Arc::new(LocalConnector::new());
        let rt = realtime(&connector);
        rt.listen(ChannelKind::Public, "users", "users.reload", noop());
        rt.listen(ChannelKind::Public, "roles", "roles.reload", noop());
        rt.stop("users");
        assert_eq!(rt.pending_len(), 1);
    }

    #[tokio::test]
    async fn teardown_discards_parked_requests() {
        let rt = Realtime::detached(RealtimeConfig::new("app-key"));
        rt.listen(ChannelKind::Public, "users", "users.reload", noop());
        rt.teardown();
        assert_eq!(rt.pending_len(), 0);
    }

    #[tokio::test]
    async fn invalid_names_are_rejected_not_parked() {
        let rt = Realtime::detached(RealtimeConfig::new("app-key"));
        assert!(matches!(
            rt.listen(ChannelKind::Public, "", "users.reload", noop()),
            Listening::Rejected
        ));
        assert_eq!(rt.pending_len(), 0);
    }
}
