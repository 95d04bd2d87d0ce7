//! Private-channel authorization against the backend's broadcast endpoint.

use pulseboard_shared::{try_error_message, ChannelAuthRequest, ChannelAuthResponse, RealtimeError};
use reqwest::Client;

use crate::session::Credential;

/// Posts `{socket_id, channel_name}` with the session's bearer token and
/// returns the signature the socket server expects on `pusher:subscribe`.
#[derive(Debug, Clone)]
pub struct ChannelAuthorizer {
    client: Client,
    endpoint: String,
    credential: Credential,
}

impl ChannelAuthorizer {
    pub fn new(client: Client, endpoint: impl Into<String>, credential: Credential) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            credential,
        }
    }

    pub async fn authorize(&self, socket_id: &str, channel: &str) -> Result<String, RealtimeError> {
        let rejected = |reason: String| RealtimeError::Authorization {
            channel: channel.to_string(),
            reason,
        };

        let body = ChannelAuthRequest {
            socket_id: socket_id.to_string(),
            channel_name: channel.to_string(),
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, self.credential.bearer())
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| rejected(format!("request failed: {e}")))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| rejected(format!("failed to read body: {e}")))?;

        if !status.is_success() {
            let message = try_error_message(&text).unwrap_or(text);
            return Err(rejected(format!("HTTP {}: {}", status.as_u16(), message)));
        }

        let parsed: ChannelAuthResponse =
            serde_json::from_str(&text).map_err(|e| rejected(format!("bad response: {e}")))?;
        Ok(parsed.auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn authorizer(server: &MockServer) -> ChannelAuthorizer {
        ChannelAuthorizer::new(
            Client::new(),
            format!("{}/api/broadcasting/auth", server.uri()),
            Credential::new("tok-123").unwrap(),
        )
    }

    #[tokio::test]
    async fn posts_socket_and_channel_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/broadcasting/auth"))
            .and(header("authorization", "Bearer tok-123"))
            .and(body_json(serde_json::json!({
                "socket_id": "123.456",
                "channel_name": "private-user.42",
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "auth": "key:sig" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let auth = authorizer(&server)
            .authorize("123.456", "private-user.42")
            .await
            .unwrap();
        assert_eq!(auth, "key:sig");
    }

    #[tokio::test]
    async fn surfaces_rejections_as_authorization_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/broadcasting/auth"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(serde_json::json!({ "message": "Not your channel" })),
            )
            .mount(&server)
            .await;

        let err = authorizer(&server)
            .authorize("123.456", "private-user.7")
            .await
            .unwrap_err();
        match err {
            RealtimeError::Authorization { channel, reason } => {
                assert_eq!(channel, "private-user.7");
                assert!(reason.contains("403"));
                assert!(reason.contains("Not your channel"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
