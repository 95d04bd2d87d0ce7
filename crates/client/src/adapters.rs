//! Typed channel adapters over the listener registry.
//!
//! | adapter | kind | channel | event |
//! |---|---|---|---|
//! | notifications | public | `notifications` | `notification.sent` |
//! | user notifications | private | `user.<id>` | `notification.sent` |
//! | account updates | private | `<resource>.<id>` | `<resource>.updated` |
//! | transaction updates | private | `transactions.<user>` | `transaction.status-changed` |
//! | table reload | public | `<resource>` | `<resource>.reload` |

use std::fmt::Display;
use std::sync::Arc;

use pulseboard_shared::{
    AccountUpdate, ChannelKind, Notification, SubscriptionKey, TableReload,
    TransactionStatusChanged,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::realtime::Realtime;
use crate::registry::SubscriptionHandle;
use crate::transport::EventCallback;

pub const NOTIFICATIONS_CHANNEL: &str = "notifications";
pub const NOTIFICATION_SENT: &str = "notification.sent";
pub const TRANSACTION_STATUS_CHANGED: &str = "transaction.status-changed";

/// Outcome of asking an adapter to listen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listening {
    /// Bound on the live connection.
    Active(SubscriptionHandle),
    /// No connection yet. The request is parked and bound once the session
    /// binder sees the connection come up.
    Pending(SubscriptionKey),
    /// The channel or event name is not usable.
    Rejected,
}

impl Listening {
    pub fn is_active(&self) -> bool {
        matches!(self, Listening::Active(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Listening::Pending(_))
    }

    pub fn handle(&self) -> Option<&SubscriptionHandle> {
        match self {
            Listening::Active(handle) => Some(handle),
            _ => None,
        }
    }
}

/// Adapter entry points, cheap to clone into views and tasks.
#[derive(Clone)]
pub struct Channels {
    realtime: Arc<Realtime>,
}

impl Channels {
    pub fn new(realtime: Arc<Realtime>) -> Self {
        Self { realtime }
    }

    pub fn realtime(&self) -> &Arc<Realtime> {
        &self.realtime
    }

    /// Broadcast notifications for every signed-in user.
    pub fn notifications<F>(&self, on_event: F) -> Listening
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        self.realtime.listen(
            ChannelKind::Public,
            NOTIFICATIONS_CHANNEL,
            NOTIFICATION_SENT,
            typed(NOTIFICATION_SENT, on_event),
        )
    }

    pub fn stop_notifications(&self) {
        self.realtime.stop(NOTIFICATIONS_CHANNEL);
    }

    /// Notifications addressed to one user.
    pub fn user_notifications<F>(&self, user_id: impl Display, on_event: F) -> Listening
    where
        F: Fn(Notification) + Send + Sync + 'static,
    {
        let Some(channel) = scoped("user", user_id) else {
            return Listening::Rejected;
        };
        self.realtime.listen(
            ChannelKind::Private,
            &channel,
            NOTIFICATION_SENT,
            typed(NOTIFICATION_SENT, on_event),
        )
    }

    pub fn stop_user_notifications(&self, user_id: impl Display) {
        if let Some(channel) = scoped("user", user_id) {
            self.realtime.stop(&channel);
        }
    }

    /// Updates to one record of `resource`, e.g. a TikTok account.
    pub fn account_updates<F>(&self, resource: &str, id: impl Display, on_event: F) -> Listening
    where
        F: Fn(AccountUpdate) + Send + Sync + 'static,
    {
        let Some(channel) = scoped(resource, id) else {
            return Listening::Rejected;
        };
        let event = format!("{resource}.updated");
        let callback = typed(&event, on_event);
        self.realtime
            .listen(ChannelKind::Private, &channel, &event, callback)
    }

    pub fn stop_account_updates(&self, resource: &str, id: impl Display) {
        if let Some(channel) = scoped(resource, id) {
            self.realtime.stop(&channel);
        }
    }

    /// Status changes of a user's transactions.
    pub fn transaction_updates<F>(&self, user_id: impl Display, on_event: F) -> Listening
    where
        F: Fn(TransactionStatusChanged) + Send + Sync + 'static,
    {
        let Some(channel) = scoped("transactions", user_id) else {
            return Listening::Rejected;
        };
        self.realtime.listen(
            ChannelKind::Private,
            &channel,
            TRANSACTION_STATUS_CHANGED,
            typed(TRANSACTION_STATUS_CHANGED, on_event),
        )
    }

    pub fn stop_transaction_updates(&self, user_id: impl Display) {
        if let Some(channel) = scoped("transactions", user_id) {
            self.realtime.stop(&channel);
        }
    }

    /// Ask a table of `resource` rows to refetch. Backends often send this
    /// event without a body.
    pub fn table_reload<F>(&self, resource: &str, on_event: F) -> Listening
    where
        F: Fn(TableReload) + Send + Sync + 'static,
    {
        if resource.is_empty() {
            return Listening::Rejected;
        }
        let event = format!("{resource}.reload");
        let name = event.clone();
        let callback: EventCallback = Arc::new(move |payload: &Value| {
            if payload.is_null() {
                on_event(TableReload::default());
                return;
            }
            match TableReload::deserialize(payload) {
                Ok(reload) => on_event(reload),
                Err(e) => tracing::warn!("dropping malformed {} payload: {}", name, e),
            }
        });
        self.realtime
            .listen(ChannelKind::Public, resource, &event, callback)
    }

    pub fn stop_table_reload(&self, resource: &str) {
        if !resource.is_empty() {
            self.realtime.stop(resource);
        }
    }
}

/// `<prefix>.<id>`, or `None` when either part is blank.
fn scoped(prefix: &str, id: impl Display) -> Option<String> {
    let id = id.to_string();
    if prefix.trim().is_empty() || id.trim().is_empty() {
        tracing::warn!("refusing channel with blank segment: {:?}.{:?}", prefix, id);
        return None;
    }
    Some(format!("{prefix}.{id}"))
}

/// Wrap a typed callback; payloads that do not decode are logged and dropped.
fn typed<T, F>(event: &str, on_event: F) -> EventCallback
where
    T: DeserializeOwned + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    let event = event.to_string();
    Arc::new(move |payload: &Value| match T::deserialize(payload) {
        Ok(value) => on_event(value),
        Err(e) => tracing::warn!("dropping malformed {} payload: {}", event, e),
    })
}
