//! Pusher protocol socket handling.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use pulseboard_shared::{protocol, ChannelKind, PusherFrame, SubscribeData};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::state::AppState;

/// Pusher close codes: 4001 is "application does not exist".
const APP_NOT_FOUND: u32 = 4001;
/// Generic client error for malformed frames.
const BAD_REQUEST: u32 = 4200;

/// WebSocket upgrade handler for `/app/{key}`.
pub async fn ws_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, key, state))
}

async fn handle_socket(socket: WebSocket, key: String, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    if key != state.config.app_key {
        tracing::warn!("rejecting socket for unknown app key {:?}", key);
        let frame = PusherFrame::error(APP_NOT_FOUND, "Application does not exist");
        if let Ok(json) = serde_json::to_string(&frame) {
            let _ = sender.send(Message::Text(json.into())).await;
        }
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    let socket_id = state.new_socket_id();
    let (forward_tx, mut forward_rx) = mpsc::unbounded_channel::<PusherFrame>();
    let mut subscriptions: HashMap<String, JoinHandle<()>> = HashMap::new();

    // Task to forward frames to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(frame) = forward_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("failed to encode frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let _ = forward_tx.send(PusherFrame::connection_established(
        &socket_id,
        state.config.activity_timeout,
    ));
    tracing::info!("socket {} connected", socket_id);

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<PusherFrame>(&text) {
                Ok(frame) => {
                    handle_frame(frame, &socket_id, &mut subscriptions, &forward_tx, &state).await
                }
                Err(e) => {
                    tracing::debug!("socket {} sent an unreadable frame: {}", socket_id, e);
                    let _ = forward_tx.send(PusherFrame::error(BAD_REQUEST, "Invalid JSON"));
                }
            },
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }

    // Cleanup
    for (channel, handle) in subscriptions {
        stop_forwarding(&state, &channel, handle).await;
    }
    send_task.abort();

    tracing::info!("socket {} closed", socket_id);
}

async fn handle_frame(
    frame: PusherFrame,
    socket_id: &str,
    subscriptions: &mut HashMap<String, JoinHandle<()>>,
    forward_tx: &mpsc::UnboundedSender<PusherFrame>,
    state: &AppState,
) {
    match frame.event.as_str() {
        protocol::PING => {
            let _ = forward_tx.send(PusherFrame::pong());
        }
        protocol::PONG => {}
        protocol::SUBSCRIBE => {
            let Ok(request) = frame.decode_data::<SubscribeData>() else {
                let _ = forward_tx.send(PusherFrame::error(BAD_REQUEST, "Malformed subscribe"));
                return;
            };
            let channel = request.channel;
            tracing::debug!("socket {} subscribing to {}", socket_id, channel);

            if ChannelKind::from_wire(&channel).0 == ChannelKind::Private {
                let authorized = request
                    .auth
                    .as_deref()
                    .is_some_and(|auth| state.verify_channel_auth(socket_id, &channel, auth));
                if !authorized {
                    tracing::warn!("socket {} denied {}", socket_id, channel);
                    let _ = forward_tx.send(PusherFrame::subscription_error(
                        &channel,
                        403,
                        "Invalid signature",
                    ));
                    return;
                }
            }

            if !subscriptions.contains_key(&channel) {
                let broadcast_rx = state.get_or_create_channel(&channel).await.subscribe();
                let handle = tokio::spawn(forward_channel(
                    channel.clone(),
                    broadcast_rx,
                    forward_tx.clone(),
                ));
                subscriptions.insert(channel.clone(), handle);
            }

            let _ = forward_tx.send(PusherFrame::subscription_succeeded(&channel));
        }
        protocol::UNSUBSCRIBE => {
            let channel = frame
                .data_value()
                .get("channel")
                .and_then(|c| c.as_str())
                .map(str::to_string);
            if let Some(channel) = channel {
                if let Some(handle) = subscriptions.remove(&channel) {
                    stop_forwarding(state, &channel, handle).await;
                }
            }
        }
        event => {
            tracing::debug!("socket {} sent unsupported event {}", socket_id, event);
        }
    }
}

/// Relay one channel's broadcasts to a socket. A slow socket skips what it
/// missed and keeps its subscription.
async fn forward_channel(
    channel: String,
    mut broadcast_rx: broadcast::Receiver<PusherFrame>,
    forward: mpsc::UnboundedSender<PusherFrame>,
) {
    loop {
        match broadcast_rx.recv().await {
            Ok(frame) => {
                if forward.send(frame).is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!("subscriber on {} lagged; {} frames skipped", channel, skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::debug!("subscription task for {} ended", channel);
}

/// Stop a forward task and drop the channel once nobody listens to it.
async fn stop_forwarding(state: &AppState, channel: &str, handle: JoinHandle<()>) {
    handle.abort();
    // The receiver is released when the aborted task is dropped.
    let _ = handle.await;
    state.release_channel(channel).await;
}
