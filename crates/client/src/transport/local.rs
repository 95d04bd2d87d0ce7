//! In-process transport: events are delivered synchronously by [`LocalTransport::emit`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use pulseboard_shared::{ChannelKind, RealtimeError};
use serde_json::Value;
use tokio::sync::watch;

use super::{lock, Connector, EventCallback, ListenerId, ListenerTable, Transport, TransportState};
use crate::config::RealtimeConfig;
use crate::session::Credential;

/// Transport without a socket. Useful for tests, previews, and embedding the
/// realtime layer where another component feeds it events.
pub struct LocalTransport {
    listeners: ListenerTable,
    joined: Mutex<HashSet<String>>,
    left: Mutex<Vec<String>>,
    state: watch::Sender<TransportState>,
    credential: Credential,
}

impl LocalTransport {
    pub fn new(credential: Credential, initial: TransportState) -> Self {
        let (state, _rx) = watch::channel(initial);
        Self {
            listeners: ListenerTable::default(),
            joined: Mutex::new(HashSet::new()),
            left: Mutex::new(Vec::new()),
            state,
            credential,
        }
    }

    /// Deliver an event to every callback bound to `(kind, channel, event)`.
    /// Returns how many callbacks ran.
    pub fn emit(&self, kind: ChannelKind, channel: &str, event: &str, payload: &Value) -> usize {
        let callbacks = self.listeners.callbacks(&kind.wire_name(channel), event);
        for callback in &callbacks {
            callback(payload);
        }
        callbacks.len()
    }

    pub fn set_state(&self, state: TransportState) {
        self.state.send_replace(state);
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Wire names of channels with at least one listener.
    pub fn joined_channels(&self) -> Vec<String> {
        let mut joined: Vec<_> = lock(&self.joined).iter().cloned().collect();
        joined.sort();
        joined
    }

    /// Wire names passed to `leave`, in call order.
    pub fn left_channels(&self) -> Vec<String> {
        lock(&self.left).clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.listener_count()
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(*self.state.borrow(), TransportState::Disconnected)
    }
}

impl Transport for LocalTransport {
    fn listen(
        &self,
        kind: ChannelKind,
        channel: &str,
        event: &str,
        callback: EventCallback,
    ) -> ListenerId {
        let wire = kind.wire_name(channel);
        let (id, first) = self.listeners.add(&wire, event, callback);
        if first {
            lock(&self.joined).insert(wire);
        }
        id
    }

    fn stop_listening(&self, kind: ChannelKind, channel: &str, event: &str, id: ListenerId) {
        let wire = kind.wire_name(channel);
        if self.listeners.remove(&wire, event, id) {
            lock(&self.joined).remove(&wire);
        }
    }

    fn leave(&self, kind: ChannelKind, channel: &str) {
        let wire = kind.wire_name(channel);
        self.listeners.remove_channel(&wire);
        lock(&self.joined).remove(&wire);
        lock(&self.left).push(wire);
    }

    fn disconnect(&self) {
        self.listeners.clear();
        lock(&self.joined).clear();
        self.state.send_replace(TransportState::Disconnected);
    }

    fn state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }
}

/// Connector producing [`LocalTransport`]s and remembering each one.
pub struct LocalConnector {
    initial: TransportState,
    fail: AtomicBool,
    opened: Mutex<Vec<Arc<LocalTransport>>>,
}

impl Default for LocalConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalConnector {
    /// Transports start out `Connected`.
    pub fn new() -> Self {
        Self::with_initial_state(TransportState::Connected)
    }

    pub fn with_initial_state(initial: TransportState) -> Self {
        Self {
            initial,
            fail: AtomicBool::new(false),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Make subsequent `connect` calls fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// The most recently opened transport.
    pub fn last(&self) -> Option<Arc<LocalTransport>> {
        lock(&self.opened).last().cloned()
    }

    pub fn opened(&self) -> usize {
        lock(&self.opened).len()
    }
}

impl Connector for LocalConnector {
    fn connect(
        &self,
        _config: &RealtimeConfig,
        credential: &Credential,
    ) -> Result<Arc<dyn Transport>, RealtimeError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(RealtimeError::Connect("local connector set to fail".into()));
        }
        let transport = Arc::new(LocalTransport::new(credential.clone(), self.initial.clone()));
        lock(&self.opened).push(transport.clone());
        Ok(transport)
    }
}
