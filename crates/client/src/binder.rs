//! Session binder: ties the realtime connection to the auth session.
//!
//! ```text
//! Idle -> Connecting -> Connected -> Disconnected | Error -> Idle
//! ```
//!
//! Credential changes open, switch, or tear down the connection. Transport
//! state events move the binder between `Connecting`, `Connected`,
//! `Disconnected` and `Error`. Entering `Connected` re-arms parked adapter
//! requests. A failed transport is released right after `Error` is
//! published, leaving the binder `Idle`; the next session snapshot with a
//! credential connects again. The binder never retries on its own.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

use crate::adapters::Channels;
use crate::connection::{Connection, ConnectionId};
use crate::realtime::Realtime;
use crate::session::{Credential, SessionSnapshot, SessionStatus};
use crate::transport::TransportState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BinderState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for BinderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinderState::Idle => "idle",
            BinderState::Connecting => "connecting",
            BinderState::Connected => "connected",
            BinderState::Disconnected => "disconnected",
            BinderState::Error => "error",
        };
        f.write_str(s)
    }
}

impl From<&TransportState> for BinderState {
    fn from(state: &TransportState) -> Self {
        match state {
            TransportState::Connecting | TransportState::Reconnecting { .. } => {
                BinderState::Connecting
            }
            TransportState::Connected => BinderState::Connected,
            TransportState::Disconnected => BinderState::Disconnected,
            TransportState::Failed { .. } => BinderState::Error,
        }
    }
}

#[derive(Clone)]
struct Bound {
    credential: Credential,
    connection: Connection,
}

struct BinderInner {
    realtime: Arc<Realtime>,
    state: watch::Sender<BinderState>,
    bound: watch::Sender<Option<Bound>>,
}

/// Owns the connect/teardown lifecycle for one mounted view tree.
#[derive(Clone)]
pub struct SessionBinder {
    inner: Arc<BinderInner>,
}

impl SessionBinder {
    pub fn new(realtime: Arc<Realtime>) -> Self {
        let (state, _) = watch::channel(BinderState::Idle);
        let (bound, _) = watch::channel(None);
        Self {
            inner: Arc::new(BinderInner {
                realtime,
                state,
                bound,
            }),
        }
    }

    pub fn realtime(&self) -> &Arc<Realtime> {
        &self.inner.realtime
    }

    /// Adapters for the rest of the view tree.
    pub fn channels(&self) -> Channels {
        self.inner.realtime.channels()
    }

    pub fn state(&self) -> BinderState {
        *self.inner.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<BinderState> {
        self.inner.state.subscribe()
    }

    /// The connection this binder opened, if any.
    pub fn connection(&self) -> Option<Connection> {
        self.inner
            .bound
            .borrow()
            .as_ref()
            .map(|bound| bound.connection.clone())
    }

    pub fn mount(&self, session: &SessionSnapshot) {
        tracing::debug!("session binder mounted");
        self.apply_session(session);
    }

    /// React to a new session snapshot.
    pub fn apply_session(&self, session: &SessionSnapshot) {
        if session.status == SessionStatus::Loading {
            return;
        }

        let bound = self.inner.bound.borrow().clone();
        match (bound, session.active_credential()) {
            (None, Some(credential)) => self.connect(credential),
            (Some(bound), Some(credential)) => {
                let live = self.inner.realtime.current_connection();
                if bound.credential == *credential && live.as_ref() == Some(&bound.connection) {
                    return;
                }
                tracing::info!("session changed; rebinding realtime connection");
                self.release();
                self.connect(credential);
            }
            (Some(_), None) => {
                tracing::info!("session ended; tearing down realtime connection");
                self.release();
            }
            (None, None) => {}
        }
    }

    /// Tear everything down. The binder can be mounted again afterwards.
    pub fn unmount(&self) {
        tracing::debug!("session binder unmounted");
        self.release();
    }

    /// Pull the current transport state of the bound connection.
    pub fn sync_transport_state(&self) {
        if let Some(connection) = self.connection() {
            let state = connection.state();
            self.on_transport_state(connection.id(), &state);
        }
    }

    /// Follow transport state of whichever connection is bound, across
    /// rebinds. Runs until the binder is dropped.
    pub async fn follow_transport(&self) {
        let mut bound_rx = self.inner.bound.subscribe();
        loop {
            let connection = bound_rx
                .borrow_and_update()
                .as_ref()
                .map(|bound| bound.connection.clone());

            let rebound = match connection {
                None => bound_rx.changed().await,
                Some(connection) => {
                    let mut states = connection.state_changes();
                    let current = states.borrow_and_update().clone();
                    self.on_transport_state(connection.id(), &current);
                    let mut transport_open = true;
                    loop {
                        tokio::select! {
                            changed = states.changed(), if transport_open => {
                                if changed.is_err() {
                                    transport_open = false;
                                    continue;
                                }
                                let state = states.borrow_and_update().clone();
                                self.on_transport_state(connection.id(), &state);
                            }
                            changed = bound_rx.changed() => break changed,
                        }
                    }
                }
            };

            if rebound.is_err() {
                return;
            }
        }
    }

    /// Drive the binder from a session source until it closes, then unmount.
    pub async fn run(&self, mut session: watch::Receiver<SessionSnapshot>) {
        let snapshot = session.borrow_and_update().clone();
        self.mount(&snapshot);

        let follower = {
            let binder = self.clone();
            tokio::spawn(async move { binder.follow_transport().await })
        };

        while session.changed().await.is_ok() {
            let snapshot = session.borrow_and_update().clone();
            self.apply_session(&snapshot);
        }

        follower.abort();
        self.unmount();
    }

    fn connect(&self, credential: &Credential) {
        self.set_state(BinderState::Connecting);
        match self.inner.realtime.ensure_connection(Some(credential)) {
            Some(connection) => {
                self.inner.bound.send_replace(Some(Bound {
                    credential: credential.clone(),
                    connection,
                }));
                self.sync_transport_state();
            }
            None => {
                tracing::debug!("realtime unavailable; binder stays idle");
                self.set_state(BinderState::Idle);
            }
        }
    }

    fn release(&self) {
        self.inner.bound.send_replace(None);
        self.inner.realtime.teardown();
        self.set_state(BinderState::Idle);
    }

    fn on_transport_state(&self, connection: ConnectionId, state: &TransportState) {
        let is_bound = self
            .inner
            .bound
            .borrow()
            .as_ref()
            .is_some_and(|bound| bound.connection.id() == connection);
        if !is_bound {
            return;
        }

        let next = BinderState::from(state);
        let mut entered_connected = false;
        let changed = self.inner.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            entered_connected = next == BinderState::Connected;
            *current = next;
            true
        });

        if changed {
            tracing::debug!("binder state -> {}", next);
        }
        if next == BinderState::Error {
            tracing::warn!("{} failed; releasing it until the session changes", connection);
            self.release();
            return;
        }
        if entered_connected {
            let armed = self.inner.realtime.rearm();
            tracing::debug!("{} connected; {} parked subscriptions armed", connection, armed);
        }
    }

    fn set_state(&self, next: BinderState) {
        self.inner.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
