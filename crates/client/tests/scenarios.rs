//! Session-driven scenarios over the in-process transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pulseboard_client::shared::ChannelKind;
use pulseboard_client::transport::{Connector, LocalConnector};
use pulseboard_client::{
    BinderState, Credential, EventCallback, Listening, Realtime, RealtimeConfig, SessionBinder,
    SessionSnapshot, SessionStore,
};
use serde_json::json;

fn realtime(connector: &Arc<LocalConnector>) -> Arc<Realtime> {
    let connector: Arc<dyn Connector> = connector.clone();
    Realtime::new(RealtimeConfig::new("app-key"), Some(connector))
}

fn counting() -> (Arc<AtomicUsize>, EventCallback) {
    let hits = Arc::new(AtomicUsize::new(0));
    let inner = hits.clone();
    (
        hits,
        Arc::new(move |_| {
            inner.fetch_add(1, Ordering::SeqCst);
        }),
    )
}

#[tokio::test]
async fn login_subscribe_logout() {
    let connector = Arc::new(LocalConnector::new());
    let rt = realtime(&connector);
    let binder = SessionBinder::new(rt.clone());

    // No credential yet.
    assert!(rt.ensure_connection(None).is_none());
    binder.mount(&SessionSnapshot::unauthenticated());
    assert_eq!(binder.state(), BinderState::Idle);

    // Credential arrives.
    let credential = Credential::new("tok-123").unwrap();
    binder.apply_session(&SessionSnapshot::authenticated(credential.clone()));
    assert!(rt.ensure_connection(Some(&credential)).is_some());

    let (_, cb) = counting();
    assert!(rt
        .subscribe(ChannelKind::Public, "notifications", "notification.sent", cb)
        .is_some());

    // Credential goes away.
    binder.apply_session(&SessionSnapshot::unauthenticated());
    let (_, cb) = counting();
    assert!(rt
        .subscribe(ChannelKind::Public, "notifications", "notification.sent", cb)
        .is_none());
    assert!(rt.registry().is_empty());
}

#[tokio::test]
async fn private_and_public_channels_with_the_same_name_stay_apart() {
    let connector = Arc::new(LocalConnector::new());
    let rt = realtime(&connector);
    rt.ensure_connection(Some(&Credential::new("tok-123").unwrap()))
        .unwrap();

    let (private_hits, private_cb) = counting();
    let (public_hits, public_cb) = counting();
    rt.subscribe(ChannelKind::Private, "user.42", "notification.sent", private_cb)
        .unwrap();
    rt.subscribe(ChannelKind::Public, "notifications", "notification.sent", public_cb)
        .unwrap();

    connector.last().unwrap().emit(
        ChannelKind::Private,
        "user.42",
        "notification.sent",
        &json!({ "message": "for 42 only" }),
    );
    assert_eq!(private_hits.load(Ordering::SeqCst), 1);
    assert_eq!(public_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn public_channels_cannot_shadow_private_ones() {
    let connector = Arc::new(LocalConnector::new());
    let rt = realtime(&connector);
    rt.ensure_connection(Some(&Credential::new("tok-123").unwrap()))
        .unwrap();

    let (private_hits, private_cb) = counting();
    let (shadow_hits, shadow_cb) = counting();
    rt.subscribe(ChannelKind::Private, "user.42", "notification.sent", private_cb)
        .unwrap();
    assert!(rt
        .subscribe(ChannelKind::Public, "private-user.42", "notification.sent", shadow_cb)
        .is_none());

    connector.last().unwrap().emit(
        ChannelKind::Private,
        "user.42",
        "notification.sent",
        &json!({ "message": "for 42 only" }),
    );
    assert_eq!(private_hits.load(Ordering::SeqCst), 1);
    assert_eq!(shadow_hits.load(Ordering::SeqCst), 0);
    assert_eq!(rt.registry().len(), 1);
}

#[tokio::test]
async fn only_the_latest_callback_receives_events() {
    let connector = Arc::new(LocalConnector::new());
    let rt = realtime(&connector);
    rt.ensure_connection(Some(&Credential::new("tok-123").unwrap()))
        .unwrap();

    let counters: Vec<_> = (0..5).map(|_| counting()).collect();
    for (_, cb) in &counters {
        rt.subscribe(ChannelKind::Public, "users", "users.reload", cb.clone())
            .unwrap();
    }
    connector
        .last()
        .unwrap()
        .emit(ChannelKind::Public, "users", "users.reload", &json!({}));

    let hits: Vec<_> = counters
        .iter()
        .map(|(hits, _)| hits.load(Ordering::SeqCst))
        .collect();
    assert_eq!(hits, vec![0, 0, 0, 0, 1]);
    assert_eq!(rt.registry().len(), 1);
}

#[tokio::test]
async fn teardown_then_reconnect_gives_a_fresh_connection_and_registry() {
    let connector = Arc::new(LocalConnector::new());
    let rt = realtime(&connector);
    let credential = Credential::new("tok-123").unwrap();

    let first = rt.ensure_connection(Some(&credential)).unwrap();
    assert_eq!(rt.ensure_connection(Some(&credential)).unwrap(), first);
    let (_, cb) = counting();
    rt.subscribe(ChannelKind::Public, "users", "users.reload", cb);

    rt.teardown();
    let second = rt.ensure_connection(Some(&credential)).unwrap();
    assert_ne!(first, second);
    assert!(rt.registry().is_empty());
}

#[tokio::test]
async fn unsubscribe_by_channel_ignores_event_names() {
    let connector = Arc::new(LocalConnector::new());
    let rt = realtime(&connector);
    rt.ensure_connection(Some(&Credential::new("tok-123").unwrap()))
        .unwrap();
    for event in ["a.created", "a.updated", "a.deleted"] {
        let (_, cb) = counting();
        rt.subscribe(ChannelKind::Private, "accounts.1", event, cb);
    }
    let (_, cb) = counting();
    rt.subscribe(ChannelKind::Private, "accounts.2", "a.updated", cb);

    rt.unsubscribe("accounts.1", None);
    assert_eq!(rt.registry().len(), 1);
}

#[tokio::test]
async fn table_reload_waits_for_the_session() {
    let connector = Arc::new(LocalConnector::new());
    let rt = realtime(&connector);
    let binder = SessionBinder::new(rt.clone());
    let store = SessionStore::new();
    binder.mount(&store.snapshot());

    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = reasons.clone();
    let outcome = binder.channels().table_reload("transactions", move |reload| {
        sink.lock().unwrap().push(reload.reason);
    });
    let Listening::Pending(key) = outcome else {
        panic!("expected a pending request, got {outcome:?}");
    };
    assert_eq!(key.to_string(), "public:transactions:transactions.reload");

    store.sign_in("tok-123");
    binder.apply_session(&store.snapshot());
    assert_eq!(binder.state(), BinderState::Connected);
    assert!(rt.registry().contains(&key));

    connector.last().unwrap().emit(
        ChannelKind::Public,
        "transactions",
        "transactions.reload",
        &json!({ "reason": "refund" }),
    );
    assert_eq!(*reasons.lock().unwrap(), vec![Some("refund".to_string())]);
}

#[tokio::test]
async fn forced_sign_out_tears_down() {
    let connector = Arc::new(LocalConnector::new());
    let rt = realtime(&connector);
    let binder = SessionBinder::new(rt.clone());
    let store = SessionStore::new();
    store.sign_in("tok-123");
    binder.mount(&store.snapshot());
    assert!(rt.current_connection().is_some());

    store.force_sign_out("401 from /api/users");
    binder.apply_session(&store.snapshot());
    assert!(rt.current_connection().is_none());
    assert!(connector.last().unwrap().is_disconnected());
}

#[test]
fn no_runtime_means_no_connection_and_no_panic() {
    let connector = Arc::new(LocalConnector::new());
    let rt = realtime(&connector);
    let binder = SessionBinder::new(rt.clone());
    binder.mount(&SessionSnapshot::authenticated(
        Credential::new("tok-123").unwrap(),
    ));
    assert!(rt.current_connection().is_none());
    assert_eq!(binder.state(), BinderState::Idle);
    assert!(binder.channels().notifications(|_| {}).is_pending());
    binder.unmount();
}
