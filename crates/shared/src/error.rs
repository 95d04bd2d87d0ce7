//! Error types shared by the client crates.

use thiserror::Error;

/// Pull a user-facing message out of an error body (`{"message": ..}` or
/// `{"error": ..}`).
pub fn try_error_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok()?;
    ["message", "error"]
        .iter()
        .filter_map(|field| parsed.get(*field)?.as_str())
        .map(str::trim)
        .find(|msg| !msg.is_empty())
        .map(str::to_string)
}

/// Errors from REST calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Deserialization error: {0}")]
    Deserialize(String),
}

/// Errors inside the realtime layer. None of these escape its public
/// operations; they are logged and turned into `None`/no-ops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    #[error("invalid realtime configuration: {0}")]
    Config(String),
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("channel authorization failed for {channel}: {reason}")]
    Authorization { channel: String, reason: String },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_message_then_error() {
        assert_eq!(
            try_error_message(r#"{"message": "Token expired"}"#).as_deref(),
            Some("Token expired")
        );
        assert_eq!(
            try_error_message(r#"{"message": " ", "error": "Forbidden"}"#).as_deref(),
            Some("Forbidden")
        );
        assert_eq!(try_error_message("<html>"), None);
    }
}
