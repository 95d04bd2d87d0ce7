//! End-to-end: Pusher transport against the development relay.

use std::net::SocketAddr;
use std::time::Duration;

use pulseboard_client::shared::{Notification, PublishResponse};
use pulseboard_client::{BinderState, Realtime, RealtimeConfig, SessionBinder, SessionStore};
use pulseboard_server::{router, AppState, RelayConfig};
use serde_json::json;
use tokio::sync::mpsc;

async fn spawn_relay() -> SocketAddr {
    let config = RelayConfig::new("app-key").with_token("tok-123", "42");
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(AppState::new(config)))
            .await
            .unwrap();
    });
    addr
}

fn client_config(addr: SocketAddr) -> RealtimeConfig {
    let mut config = RealtimeConfig::new("app-key");
    config.host = addr.ip().to_string();
    config.port = addr.port();
    config.auth_endpoint = format!("http://{addr}/api/broadcasting/auth");
    config
}

async fn publish(addr: SocketAddr, channel: &str, message: &str) -> usize {
    reqwest::Client::new()
        .post(format!("http://{addr}/api/events"))
        .json(&json!({
            "channel": channel,
            "event": "notification.sent",
            "data": { "message": message },
        }))
        .send()
        .await
        .unwrap()
        .json::<PublishResponse>()
        .await
        .unwrap()
        .delivered
}

/// Publish until some socket has joined the channel.
async fn publish_until_delivered(addr: SocketAddr, channel: &str, message: &str) {
    for _ in 0..100 {
        if publish(addr, channel, message).await > 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("no socket joined {channel}");
}

#[tokio::test]
async fn private_notifications_flow_through_the_relay() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("pulseboard_client=debug")
        .with_test_writer()
        .try_init();

    let addr = spawn_relay().await;
    let realtime = Realtime::with_pusher(client_config(addr));
    let binder = SessionBinder::new(realtime);
    let store = SessionStore::new();
    let mut states = binder.state_changes();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let channels = binder.channels();
    let outcome = channels.user_notifications(42, move |n: Notification| {
        let _ = tx.send(n.message);
    });
    assert!(outcome.is_pending());
    // Refused by the relay: user 7 is not the bearer of tok-123.
    channels.user_notifications(7, |_| panic!("received a foreign notification"));

    let run = tokio::spawn({
        let binder = binder.clone();
        let session = store.subscribe();
        async move { binder.run(session).await }
    });
    store.sign_in("tok-123");

    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|s| *s == BinderState::Connected),
    )
    .await
    .unwrap()
    .unwrap();

    publish_until_delivered(addr, "private-user.42", "Invoice paid").await;
    let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message, "Invoice paid");
    assert_eq!(publish(addr, "private-user.7", "not yours").await, 0);

    store.sign_out();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(|s| *s == BinderState::Idle))
        .await
        .unwrap()
        .unwrap();
    assert!(binder.realtime().registry().is_empty());

    drop(store);
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap();
}
