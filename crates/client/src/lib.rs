//! Pulseboard realtime client
//!
//! Live updates for the dashboard: one shared connection per session, a
//! registry keeping at most one listener per `(kind, channel, event)`, typed
//! channel adapters, and a binder that follows the auth session.
//!
//! ```no_run
//! use pulseboard_client::{RealtimeConfig, Realtime, SessionBinder, SessionStore};
//!
//! # async fn run() -> Result<(), pulseboard_client::ConfigError> {
//! let realtime = Realtime::with_pusher(RealtimeConfig::from_env()?);
//! let session = SessionStore::new();
//! let binder = SessionBinder::new(realtime);
//!
//! binder.channels().notifications(|n| println!("{}", n.message));
//! session.sign_in("tok-123");
//! binder.run(session.subscribe()).await;
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod api_client;
pub mod binder;
pub mod config;
pub mod connection;
pub mod realtime;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(feature = "dioxus")]
pub mod provider;

pub use adapters::{Channels, Listening};
pub use api_client::{ApiClient, ApiResponse};
pub use binder::{BinderState, SessionBinder};
pub use config::{ConfigError, ReconnectConfig, RealtimeConfig, TransportKind};
pub use connection::{Connection, ConnectionId, ConnectionManager};
pub use realtime::Realtime;
pub use registry::{ListenerRegistry, SubscriptionHandle};
pub use session::{Credential, SessionSnapshot, SessionStatus, SessionStore};
pub use transport::{EventCallback, TransportState};

#[cfg(feature = "dioxus")]
pub use provider::{use_binder_state, use_realtime, RealtimeProvider};

pub use pulseboard_shared as shared;
