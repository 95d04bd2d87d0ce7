//! Pusher protocol (v7) frames, as spoken by Laravel Reverb.
//!
//! Every frame is a JSON object `{"event": .., "channel": .., "data": ..}`.
//! Servers usually encode `data` as a JSON *string*, so readers should go
//! through [`PusherFrame::data_value`] instead of reading `data` directly.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u8 = 7;

pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
pub const ERROR: &str = "pusher:error";
pub const PING: &str = "pusher:ping";
pub const PONG: &str = "pusher:pong";
pub const SUBSCRIBE: &str = "pusher:subscribe";
pub const UNSUBSCRIBE: &str = "pusher:unsubscribe";
pub const SUBSCRIPTION_ERROR: &str = "pusher:subscription_error";
pub const SUBSCRIPTION_SUCCEEDED: &str = "pusher_internal:subscription_succeeded";

/// A single frame on the socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PusherFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl PusherFrame {
    fn new(event: &str, channel: Option<String>, data: Value) -> Self {
        Self {
            event: event.to_string(),
            channel,
            data,
        }
    }

    pub fn ping() -> Self {
        Self::new(PING, None, Value::Object(Default::default()))
    }

    pub fn pong() -> Self {
        Self::new(PONG, None, Value::Object(Default::default()))
    }

    pub fn subscribe(channel: &str, auth: Option<String>) -> Self {
        let data = serde_json::to_value(SubscribeData {
            channel: channel.to_string(),
            auth,
        })
        .unwrap_or_default();
        Self::new(SUBSCRIBE, None, data)
    }

    pub fn unsubscribe(channel: &str) -> Self {
        Self::new(UNSUBSCRIBE, None, serde_json::json!({ "channel": channel }))
    }

    /// Server greeting. `data` is string-encoded the way Reverb sends it.
    pub fn connection_established(socket_id: &str, activity_timeout: u64) -> Self {
        let data = ConnectionEstablished {
            socket_id: socket_id.to_string(),
            activity_timeout: Some(activity_timeout),
        };
        Self::new(CONNECTION_ESTABLISHED, None, encode_data(&data))
    }

    pub fn subscription_succeeded(channel: &str) -> Self {
        Self::new(
            SUBSCRIPTION_SUCCEEDED,
            Some(channel.to_string()),
            Value::String("{}".to_string()),
        )
    }

    pub fn subscription_error(channel: &str, status: u16, error: &str) -> Self {
        Self::new(
            SUBSCRIPTION_ERROR,
            Some(channel.to_string()),
            serde_json::json!({ "type": "AuthError", "error": error, "status": status }),
        )
    }

    pub fn error(code: u32, message: &str) -> Self {
        let data = ErrorData {
            code: Some(code),
            message: message.to_string(),
        };
        Self::new(ERROR, None, serde_json::to_value(data).unwrap_or_default())
    }

    /// Application event on a channel, with `data` string-encoded.
    pub fn event(channel: &str, event: &str, data: &Value) -> Self {
        Self::new(event, Some(channel.to_string()), encode_data(data))
    }

    /// `data` as a JSON value, decoding the string form when it holds JSON.
    pub fn data_value(&self) -> Value {
        match &self.data {
            Value::String(raw) => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
            other => other.clone(),
        }
    }

    /// Decode `data` into a typed structure.
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data_value())
    }

    /// Protocol-level frames (`pusher:*`, `pusher_internal:*`).
    pub fn is_protocol(&self) -> bool {
        self.event.starts_with("pusher:") || self.event.starts_with("pusher_internal:")
    }
}

fn encode_data<T: Serialize>(data: &T) -> Value {
    Value::String(serde_json::to_string(data).unwrap_or_default())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionEstablished {
    pub socket_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscribeData {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorData {
    #[serde(default)]
    pub code: Option<u32>,
    #[serde(default)]
    pub message: String,
}

/// Body posted to the broadcast authorization endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelAuthRequest {
    pub socket_id: String,
    pub channel_name: String,
}

/// Signature returned by the authorization endpoint, `"<app key>:<signature>"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelAuthResponse {
    pub auth: String,
}

/// The exact string a channel authorization signs.
pub fn auth_signing_payload(socket_id: &str, channel: &str) -> String {
    format!("{socket_id}:{channel}")
}

/// Body for publishing an event through the development relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishRequest {
    /// Wire channel name (`private-` prefix included for private channels).
    pub channel: String,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishResponse {
    pub delivered: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_string_encoded_data() {
        let raw = r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"123.456\",\"activity_timeout\":30}"}"#;
        let frame: PusherFrame = serde_json::from_str(raw).unwrap();
        let established: ConnectionEstablished = frame.decode_data().unwrap();
        assert_eq!(established.socket_id, "123.456");
        assert_eq!(established.activity_timeout, Some(30));
        assert!(frame.is_protocol());
    }

    #[test]
    fn keeps_object_data_and_plain_strings() {
        let frame = PusherFrame {
            event: "users.reload".into(),
            channel: Some("users".into()),
            data: serde_json::json!({ "reason": "import" }),
        };
        assert_eq!(frame.data_value()["reason"], "import");

        let plain = PusherFrame {
            event: "users.reload".into(),
            channel: Some("users".into()),
            data: Value::String("not json".into()),
        };
        assert_eq!(plain.data_value(), Value::String("not json".into()));
    }

    #[test]
    fn subscribe_frame_omits_auth_for_public_channels() {
        let frame = PusherFrame::subscribe("notifications", None);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], SUBSCRIBE);
        assert_eq!(json["data"]["channel"], "notifications");
        assert!(json["data"].get("auth").is_none());
        assert!(json.get("channel").is_none());
    }
}
