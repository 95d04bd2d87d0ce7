//! Pusher protocol transport using tokio-tungstenite.
//!
//! The socket lives in a background task. The transport handle talks to it
//! through an unbounded command channel; the listener table is shared, so
//! incoming events are dispatched without a round trip through the handle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use pulseboard_shared::{
    protocol, ChannelKind, ConnectionEstablished, ErrorData, PusherFrame, RealtimeError,
};
use reqwest::Client;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::{
    ChannelAuthorizer, Connector, EventCallback, ListenerId, ListenerTable, Transport,
    TransportState,
};
use crate::config::{RealtimeConfig, ReconnectConfig};
use crate::session::Credential;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Opens [`PusherTransport`]s. Requires a Tokio runtime on the calling thread.
#[derive(Debug, Clone, Default)]
pub struct PusherConnector {
    http: Client,
}

impl PusherConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured HTTP client for channel authorization.
    pub fn with_client(http: Client) -> Self {
        Self { http }
    }
}

impl Connector for PusherConnector {
    fn connect(
        &self,
        config: &RealtimeConfig,
        credential: &Credential,
    ) -> Result<Arc<dyn Transport>, RealtimeError> {
        config
            .validate()
            .map_err(|e| RealtimeError::Config(e.to_string()))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| RealtimeError::Connect("no async runtime available".into()))?;

        let authorizer = ChannelAuthorizer::new(
            self.http.clone(),
            config.auth_endpoint.clone(),
            credential.clone(),
        );
        Ok(Arc::new(PusherTransport::spawn(&runtime, config, authorizer)))
    }
}

enum Command {
    Join(String),
    Leave(String),
    Shutdown,
}

/// Handle to a socket managed by a background connection loop.
pub struct PusherTransport {
    listeners: Arc<ListenerTable>,
    commands: UnboundedSender<Command>,
    state: Arc<watch::Sender<TransportState>>,
}

impl PusherTransport {
    fn spawn(
        runtime: &tokio::runtime::Handle,
        config: &RealtimeConfig,
        authorizer: ChannelAuthorizer,
    ) -> Self {
        let (commands, receiver) = unbounded();
        let (state, _rx) = watch::channel(TransportState::Connecting);
        let state = Arc::new(state);
        let listeners = Arc::new(ListenerTable::default());

        let worker = ConnectionLoop {
            url: config.socket_url(),
            host: config.host.clone(),
            activity_timeout: config.activity_timeout,
            reconnect: config.reconnect.clone(),
            authorizer,
            listeners: listeners.clone(),
            state: state.clone(),
        };
        runtime.spawn(worker.run(receiver));

        Self {
            listeners,
            commands,
            state,
        }
    }

    fn send(&self, command: Command) {
        if self.commands.unbounded_send(command).is_err() {
            tracing::debug!("connection loop has stopped; command dropped");
        }
    }
}

impl Transport for PusherTransport {
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
            self.send(Command::Join(wire));
        }
        id
    }

    fn stop_listening(&self, kind: ChannelKind, channel: &str, event: &str, id: ListenerId) {
        let wire = kind.wire_name(channel);
        if self.listeners.remove(&wire, event, id) {
            self.send(Command::Leave(wire));
        }
    }

    fn leave(&self, kind: ChannelKind, channel: &str) {
        let wire = kind.wire_name(channel);
        if self.listeners.remove_channel(&wire) {
            self.send(Command::Leave(wire));
        }
    }

    fn disconnect(&self) {
        self.listeners.clear();
        self.send(Command::Shutdown);
    }

    fn state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }
}

enum SessionEnd {
    Shutdown,
    Dropped(String),
}

/// Per-socket bookkeeping; reset on every reconnect.
#[derive(Default)]
struct SocketSession {
    socket_id: Option<String>,
    subscribed: HashSet<String>,
    awaiting_pong: bool,
}

struct ConnectionLoop {
    url: String,
    host: String,
    activity_timeout: Duration,
    reconnect: ReconnectConfig,
    authorizer: ChannelAuthorizer,
    listeners: Arc<ListenerTable>,
    state: Arc<watch::Sender<TransportState>>,
}

impl ConnectionLoop {
    async fn run(self, mut commands: UnboundedReceiver<Command>) {
        let mut attempt = 0u32;

        loop {
            if attempt == 0 {
                self.set_state(TransportState::Connecting);
            } else {
                self.set_state(TransportState::Reconnecting { attempt });
            }

            match connect_async(self.url.as_str()).await {
                Ok((ws_stream, _response)) => {
                    tracing::debug!("realtime socket to {} opened", self.host);
                    let mut session = SocketSession::default();
                    let end = self.session(ws_stream, &mut commands, &mut session).await;
                    if session.socket_id.is_some() {
                        attempt = 0;
                    }
                    self.set_state(TransportState::Disconnected);
                    match end {
                        SessionEnd::Shutdown => {
                            tracing::info!("realtime socket to {} closed", self.host);
                            return;
                        }
                        SessionEnd::Dropped(reason) => {
                            tracing::warn!("realtime socket to {} dropped: {}", self.host, reason);
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("realtime socket error for {}: {}", self.host, e);
                }
            }

            if self.reconnect.gives_up_after(attempt) {
                self.set_state(TransportState::Failed {
                    reason: format!(
                        "Max reconnect attempts ({}) exceeded",
                        self.reconnect.max_attempts
                    ),
                });
                return;
            }

            let delay = self.reconnect.delay_for_attempt(attempt);
            tracing::info!(
                "Reconnecting to {} in {}ms (attempt {})",
                self.host,
                delay.as_millis(),
                attempt + 1
            );
            if !wait_or_shutdown(delay, &mut commands).await {
                self.set_state(TransportState::Disconnected);
                return;
            }
            attempt += 1;
        }
    }

    async fn session(
        &self,
        ws_stream: WsStream,
        commands: &mut UnboundedReceiver<Command>,
        session: &mut SocketSession,
    ) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();
        let mut activity_timeout = self.activity_timeout;

        loop {
            tokio::select! {
                incoming = tokio::time::timeout(activity_timeout, read.next()) => {
                    let msg = match incoming {
                        Err(_elapsed) => {
                            if session.awaiting_pong {
                                return SessionEnd::Dropped("pong not received".into());
                            }
                            session.awaiting_pong = true;
                            if let Err(reason) = send_frame(&mut write, &PusherFrame::ping()).await {
                                return SessionEnd::Dropped(reason);
                            }
                            continue;
                        }
                        Ok(None) => return SessionEnd::Dropped("stream ended".into()),
                        Ok(Some(Err(e))) => return SessionEnd::Dropped(e.to_string()),
                        Ok(Some(Ok(msg))) => msg,
                    };
                    session.awaiting_pong = false;

                    match msg {
                        Message::Text(text) => {
                            let frame = match serde_json::from_str::<PusherFrame>(&text) {
                                Ok(frame) => frame,
                                Err(e) => {
                                    tracing::warn!("Failed to parse frame: {}", e);
                                    continue;
                                }
                            };
                            if frame.event == protocol::CONNECTION_ESTABLISHED {
                                if let Some(server_timeout) = server_activity_timeout(&frame) {
                                    activity_timeout = activity_timeout.min(server_timeout);
                                }
                            }
                            if let Err(reason) = self.handle_frame(frame, &mut write, session).await {
                                return SessionEnd::Dropped(reason);
                            }
                        }
                        Message::Close(_) => return SessionEnd::Dropped("close frame".into()),
                        // Pings are answered by tungstenite; binary frames are not part of the protocol.
                        _ => {}
                    }
                }
                command = commands.next() => match command {
                    None | Some(Command::Shutdown) => {
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                    Some(Command::Join(wire)) => {
                        if let Err(reason) = self.join(&mut write, session, &wire).await {
                            return SessionEnd::Dropped(reason);
                        }
                    }
                    Some(Command::Leave(wire)) => {
                        if session.subscribed.remove(&wire) {
                            tracing::debug!("leaving {}", wire);
                            if let Err(reason) = send_frame(&mut write, &PusherFrame::unsubscribe(&wire)).await {
                                return SessionEnd::Dropped(reason);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(
        &self,
        frame: PusherFrame,
        write: &mut WsSink,
        session: &mut SocketSession,
    ) -> Result<(), String> {
        match frame.event.as_str() {
            protocol::CONNECTION_ESTABLISHED => {
                let established: ConnectionEstablished = frame
                    .decode_data()
                    .map_err(|e| format!("bad handshake: {e}"))?;
                tracing::info!(
                    "realtime connected to {} (socket {})",
                    self.host,
                    established.socket_id
                );
                session.socket_id = Some(established.socket_id);
                session.subscribed.clear();
                self.set_state(TransportState::Connected);

                for wire in self.listeners.channels() {
                    self.join(write, session, &wire).await?;
                }
            }
            protocol::PING => send_frame(write, &PusherFrame::pong()).await?,
            protocol::PONG => {}
            protocol::SUBSCRIPTION_SUCCEEDED => {
                tracing::debug!("subscribed to {}", frame.channel.unwrap_or_default());
            }
            protocol::SUBSCRIPTION_ERROR => {
                tracing::warn!(
                    "subscription to {} rejected: {}",
                    frame.channel.as_deref().unwrap_or_default(),
                    frame.data_value()
                );
            }
            protocol::ERROR => {
                let error = frame.decode_data::<ErrorData>().unwrap_or(ErrorData {
                    code: None,
                    message: frame.data_value().to_string(),
                });
                tracing::warn!(
                    "realtime server error {}: {}",
                    error.code.map(|c| c.to_string()).unwrap_or_default(),
                    error.message
                );
            }
            event => {
                let Some(channel) = frame.channel.as_deref() else {
                    tracing::debug!("ignoring {} without a channel", event);
                    return Ok(());
                };
                let callbacks = self.listeners.callbacks(channel, event);
                if callbacks.is_empty() {
                    return Ok(());
                }
                let payload = frame.data_value();
                for callback in callbacks {
                    callback(&payload);
                }
            }
        }
        Ok(())
    }

    /// Subscribe on the socket, authorizing private channels first. An
    /// authorization failure leaves the channel unsubscribed; only socket
    /// write failures end the session.
    async fn join(
        &self,
        write: &mut WsSink,
        session: &mut SocketSession,
        wire: &str,
    ) -> Result<(), String> {
        let Some(socket_id) = session.socket_id.clone() else {
            // Joined once the handshake arrives.
            return Ok(());
        };
        if session.subscribed.contains(wire) {
            return Ok(());
        }

        let auth = match ChannelKind::from_wire(wire).0 {
            ChannelKind::Public => None,
            ChannelKind::Private => match self.authorizer.authorize(&socket_id, wire).await {
                Ok(auth) => Some(auth),
                Err(e) => {
                    tracing::warn!("{}", e);
                    return Ok(());
                }
            },
        };

        send_frame(write, &PusherFrame::subscribe(wire, auth)).await?;
        session.subscribed.insert(wire.to_string());
        Ok(())
    }

    fn set_state(&self, state: TransportState) {
        self.state.send_replace(state);
    }
}

fn server_activity_timeout(frame: &PusherFrame) -> Option<Duration> {
    frame
        .decode_data::<ConnectionEstablished>()
        .ok()?
        .activity_timeout
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

async fn send_frame(write: &mut WsSink, frame: &PusherFrame) -> Result<(), String> {
    let json = serde_json::to_string(frame).map_err(|e| format!("Serialize failed: {e}"))?;
    write
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| format!("Send failed: {e}"))
}

/// Sleep for `delay`, returning `false` early if the transport is shut down.
async fn wait_or_shutdown(delay: Duration, commands: &mut UnboundedReceiver<Command>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            command = commands.next() => match command {
                None | Some(Command::Shutdown) => return false,
                // Channels are rejoined from the listener table after reconnecting.
                Some(Command::Join(_)) | Some(Command::Leave(_)) => {}
            }
        }
    }
}
