//! `pulseboard watch`: bind a session and log the selected channels.

use anyhow::{bail, Context};
use pulseboard_client::shared::ApiError;
use pulseboard_client::{
    ApiClient, Channels, Listening, Realtime, RealtimeConfig, SessionBinder, SessionStore,
};
use serde_json::Value;

use crate::args::WatchArgs;

pub async fn run(args: WatchArgs) -> anyhow::Result<()> {
    let config = RealtimeConfig::from_env().context("realtime configuration")?;
    tracing::info!("realtime socket {}", config.socket_url());

    let session = SessionStore::new();
    let binder = SessionBinder::new(Realtime::with_pusher(config));
    listen(&binder.channels(), &args);

    session.sign_in(args.token.clone());

    if let Some(api_url) = &args.api_url {
        let api = ApiClient::new()
            .with_base_url(api_url.clone())
            .with_session(session.clone());
        match api.get_json::<Value>(&args.profile_path).await {
            Ok(_) => tracing::info!("token accepted by {}", api_url),
            Err(ApiError::Unauthorized) => bail!("token rejected by {api_url}"),
            Err(e) => tracing::warn!("could not verify token: {}", e),
        }
    }

    let mut states = binder.state_changes();
    let state_log = tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::info!("realtime {}", state);
        }
    });

    let runner = tokio::spawn({
        let binder = binder.clone();
        let updates = session.subscribe();
        async move { binder.run(updates).await }
    });

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");

    session.sign_out();
    drop(session);
    runner.await.context("session binder task")?;
    state_log.abort();
    Ok(())
}

fn listen(channels: &Channels, args: &WatchArgs) {
    if args.wants_broadcast_notifications() {
        report(
            "notifications",
            channels.notifications(|n| {
                tracing::info!(title = ?n.title, kind = ?n.kind, "notification: {}", n.message)
            }),
        );
    }

    if let Some(user) = &args.user {
        report(
            "user notifications",
            channels.user_notifications(user, |n| {
                tracing::info!(title = ?n.title, "personal notification: {}", n.message)
            }),
        );
        if args.transactions {
            report(
                "transactions",
                channels.transaction_updates(user, |t| {
                    tracing::info!(amount = ?t.amount, "transaction {} is now {}", t.id, t.status)
                }),
            );
        }
    }

    for resource in &args.reloads {
        let name = resource.clone();
        report(
            "table reload",
            channels.table_reload(resource, move |r| {
                tracing::info!(reason = ?r.reason, "{} table should reload", name)
            }),
        );
    }

    for (resource, id) in &args.accounts {
        report(
            "account updates",
            channels.account_updates(resource, id, |u| {
                tracing::info!(status = ?u.status, fields = u.fields.len(), "{} updated", u.id)
            }),
        );
    }
}

fn report(what: &str, outcome: Listening) {
    match outcome {
        Listening::Active(handle) => tracing::debug!("{} bound as {}", what, handle.key()),
        Listening::Pending(key) => tracing::debug!("{} waiting for connection ({})", what, key),
        Listening::Rejected => tracing::warn!("{} rejected: invalid channel name", what),
    }
}
