//! Relay state shared across handlers: channel fan-out and channel signing.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use pulseboard_shared::{auth_signing_payload, PusherFrame};
use rand::rngs::OsRng;
use rand::Rng;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};

use crate::config::RelayConfig;

const CHANNEL_CAPACITY: usize = 100;

type ChannelMap = HashMap<String, broadcast::Sender<PusherFrame>>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    channels: Arc<RwLock<ChannelMap>>,
    signing_key: Arc<SigningKey>,
}

impl AppState {
    /// A fresh signing key is generated per process, so authorizations do
    /// not survive a relay restart.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config: Arc::new(config),
            channels: Arc::new(RwLock::new(HashMap::new())),
            signing_key: Arc::new(SigningKey::generate(&mut OsRng)),
        }
    }

    /// Pusher-style socket id, `"<n>.<m>"`.
    pub fn new_socket_id(&self) -> String {
        let mut rng = rand::thread_rng();
        format!(
            "{}.{}",
            rng.gen_range(1..1_000_000_000u64),
            rng.gen_range(1..1_000_000_000u64)
        )
    }

    pub fn user_for_token(&self, token: &str) -> Option<&str> {
        self.config.tokens.get(token).map(String::as_str)
    }

    /// Get or create the fan-out sender for a wire channel name.
    pub async fn get_or_create_channel(&self, channel: &str) -> broadcast::Sender<PusherFrame> {
        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(channel) {
                return sender.clone();
            }
        }

        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(channel) {
            return sender.clone();
        }

        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        channels.insert(channel.to_string(), tx.clone());
        tx
    }

    /// Forget `channel` once no socket receives from it.
    pub async fn release_channel(&self, channel: &str) {
        let mut channels = self.channels.write().await;
        if channels
            .get(channel)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            channels.remove(channel);
            tracing::debug!("channel {} has no subscribers; dropped", channel);
        }
    }

    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Send `event` to every socket subscribed to `channel`. Returns how
    /// many sockets it reached.
    pub async fn publish(&self, channel: &str, event: &str, data: &Value) -> usize {
        let sender = {
            let channels = self.channels.read().await;
            channels.get(channel).cloned()
        };
        let Some(sender) = sender else {
            return 0;
        };
        sender
            .send(PusherFrame::event(channel, event, data))
            .unwrap_or(0)
    }

    /// `"<app key>:<base64 signature>"` over `<socket_id>:<channel>`.
    pub fn sign_channel(&self, socket_id: &str, channel: &str) -> String {
        let payload = auth_signing_payload(socket_id, channel);
        let signature = self.signing_key.sign(payload.as_bytes());
        format!(
            "{}:{}",
            self.config.app_key,
            STANDARD.encode(signature.to_bytes())
        )
    }

    pub fn verify_channel_auth(&self, socket_id: &str, channel: &str, auth: &str) -> bool {
        let Some((key, encoded)) = auth.split_once(':') else {
            return false;
        };
        if key != self.config.app_key {
            return false;
        }
        let Ok(bytes) = STANDARD.decode(encoded) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&bytes) else {
            return false;
        };
        let payload = auth_signing_payload(socket_id, channel);
        self.signing_key
            .verifying_key()
            .verify(payload.as_bytes(), &signature)
            .is_ok()
    }
}
