//! The single shared realtime connection.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use crate::config::RealtimeConfig;
use crate::registry::ListenerRegistry;
use crate::session::Credential;
use crate::transport::{lock, Connector, Transport, TransportState};

/// Identity of one opened connection. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Cheap handle to the open connection. Equality is identity.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: ConnectionId,
    credential: Credential,
    transport: Arc<dyn Transport>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn credential(&self) -> &Credential {
        &self.inner.credential
    }

    pub fn state(&self) -> TransportState {
        let states = self.inner.transport.state();
        let current = states.borrow().clone();
        current
    }

    /// False once the transport has given up.
    pub fn is_usable(&self) -> bool {
        !self.inner.transport.state().borrow().is_failed()
    }

    pub fn state_changes(&self) -> watch::Receiver<TransportState> {
        self.inner.transport.state()
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Slot holding the current connection, shared with the registry so it can
/// read (never replace) the connection.
pub(crate) type ConnectionSlot = Arc<Mutex<Option<Connection>>>;

/// Owns the connection and the registry of subscriptions made on it.
pub struct ConnectionManager {
    config: Arc<RealtimeConfig>,
    connector: Option<Arc<dyn Connector>>,
    slot: ConnectionSlot,
    registry: ListenerRegistry,
    next_id: AtomicU64,
}

impl ConnectionManager {
    /// `connector` is `None` where no transport exists (e.g. while rendering
    /// on the server); every operation is then a no-op.
    pub fn new(config: RealtimeConfig, connector: Option<Arc<dyn Connector>>) -> Self {
        let slot: ConnectionSlot = Arc::new(Mutex::new(None));
        Self {
            config: Arc::new(config),
            connector,
            registry: ListenerRegistry::new(slot.clone()),
            slot,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// The open connection, unless its transport has failed.
    pub fn current(&self) -> Option<Connection> {
        lock(&self.slot).clone().filter(Connection::is_usable)
    }

    /// Return the open connection, or open one with `credential`.
    ///
    /// Returns `None`, without error, when there is no credential, no
    /// transport, no async runtime, or the transport failed to start.
    pub fn ensure_connection(&self, credential: Option<&Credential>) -> Option<Connection> {
        if let Some(failed) = self.take_failed() {
            tracing::warn!("realtime connection {} failed; discarding it", failed.id());
            self.dispose(failed);
        }

        let mut slot = lock(&self.slot);
        if let Some(connection) = slot.as_ref() {
            return Some(connection.clone());
        }

        let Some(credential) = credential else {
            tracing::debug!("no credential; realtime connection not opened");
            return None;
        };
        let Some(connector) = self.connector.as_ref() else {
            tracing::debug!("no realtime transport in this context");
            return None;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no async runtime; realtime connection not opened");
            return None;
        };

        let transport = match connector.connect(&self.config, credential) {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!("realtime connection unavailable: {}", e);
                return None;
            }
        };

        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        runtime.spawn(log_transport_state(id, transport.state()));

        let connection = Connection {
            inner: Arc::new(ConnectionInner {
                id,
                credential: credential.clone(),
                transport,
            }),
        };
        *slot = Some(connection.clone());
        tracing::info!("realtime connection {} opened", id);
        Some(connection)
    }

    /// Cancel every subscription, close the connection, and empty the slot.
    pub fn teardown(&self) {
        let Some(connection) = lock(&self.slot).take() else {
            return;
        };
        self.dispose(connection);
    }

    fn take_failed(&self) -> Option<Connection> {
        let mut slot = lock(&self.slot);
        if slot.as_ref().is_some_and(|connection| !connection.is_usable()) {
            slot.take()
        } else {
            None
        }
    }

    fn dispose(&self, connection: Connection) {
        self.registry.release_all(Some(&connection));
        connection.transport().disconnect();
        tracing::info!("realtime connection {} torn down", connection.id());
    }
}

/// Observes a transport's state for logging only.
async fn log_transport_state(id: ConnectionId, mut states: watch::Receiver<TransportState>) {
    while states.changed().await.is_ok() {
        let state = states.borrow_and_update().clone();
        match state {
            TransportState::Connected => tracing::info!("{} connected", id),
            TransportState::Connecting => tracing::debug!("{} connecting", id),
            TransportState::Reconnecting { attempt } => {
                tracing::info!("{} reconnecting (attempt {})", id, attempt)
            }
            TransportState::Disconnected => tracing::info!("{} disconnected", id),
            TransportState::Failed { reason } => tracing::error!("{} failed: {}", id, reason),
        }
    }
}
