//! REST client for the dashboard backend.
//!
//! Every endpoint answers with `{success, data | list, total, message}`;
//! responses are unwrapped into [`ApiResponse`]. A `401` signs the session
//! out, which in turn makes the session binder tear the realtime layer down.

use pulseboard_shared::{try_error_message, ApiEnvelope, ApiError};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::session::SessionStore;

/// Unwrapped response envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub total: Option<u64>,
    pub message: Option<String>,
}

#[derive(Clone, Default)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Option<SessionStore>,
}

impl ApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL for API requests
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Attach the bearer token from `session` and sign it out on `401`.
    pub fn with_session(mut self, session: SessionStore) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if self.base_url.is_empty() {
            if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            }
        } else {
            let base = self.base_url.trim_end_matches('/');
            let path = path.trim_start_matches('/');
            format!("{base}/{path}")
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut rb = self
            .client
            .request(method, self.url(path))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(credential) = self.session.as_ref().and_then(SessionStore::credential) {
            rb = rb.header(reqwest::header::AUTHORIZATION, credential.bearer());
        }
        rb
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, ApiError> {
        self.send(self.request(Method::GET, path), path).await
    }

    pub async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.send(self.request(Method::POST, path).json(body), path)
            .await
    }

    pub async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiResponse<T>, ApiError> {
        self.send(self.request(Method::PUT, path).json(body), path)
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse<serde_json::Value>, ApiError> {
        self.send(self.request(Method::DELETE, path), path).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        rb: RequestBuilder,
        path: &str,
    ) -> Result<ApiResponse<T>, ApiError> {
        let resp = rb.send().await.map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if status == StatusCode::UNAUTHORIZED {
            if let Some(session) = &self.session {
                session.force_sign_out(&format!("401 from {path}"));
            }
            return Err(ApiError::Unauthorized);
        }

        if !status.is_success() {
            let message = try_error_message(&text).unwrap_or(text);
            return Err(ApiError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiEnvelope<T> = if text.trim().is_empty() {
            ApiEnvelope {
                success: true,
                data: None,
                total: None,
                message: None,
            }
        } else {
            serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))?
        };

        if !envelope.success {
            return Err(ApiError::Rejected(
                envelope.message.unwrap_or_else(|| "request failed".into()),
            ));
        }

        Ok(ApiResponse {
            data: envelope.data,
            total: envelope.total,
            message: envelope.message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Role {
        id: u32,
        name: String,
    }

    fn signed_in() -> SessionStore {
        let session = SessionStore::new();
        session.sign_in("tok-123");
        session
    }

    #[tokio::test]
    async fn unwraps_list_envelopes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/roles"))
            .and(header("authorization", "Bearer tok-123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "list": [{ "id": 1, "name": "admin" }],
                "total": 1,
            })))
            .mount(&server)
            .await;

        let api = ApiClient::new()
            .with_base_url(server.uri())
            .with_session(signed_in());
        let resp: ApiResponse<Vec<Role>> = api.get_json("/api/roles").await.unwrap();
        assert_eq!(resp.total, Some(1));
        assert_eq!(
            resp.data.unwrap(),
            vec![Role {
                id: 1,
                name: "admin".into()
            }]
        );
    }

    #[tokio::test]
    async fn unauthorized_forces_sign_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "message": "Unauthenticated." })))
            .mount(&server)
            .await;

        let session = signed_in();
        let api = ApiClient::new()
            .with_base_url(server.uri())
            .with_session(session.clone());
        let err = api.get_json::<serde_json::Value>("/api/users").await.unwrap_err();
        assert_eq!(err, ApiError::Unauthorized);
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn unsuccessful_envelopes_are_rejections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "message": "Insufficient balance",
            })))
            .mount(&server)
            .await;

        let api = ApiClient::new().with_base_url(server.uri());
        let err = api
            .post_json::<_, serde_json::Value>("/api/transactions", &json!({ "amount": 10 }))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::Rejected("Insufficient balance".into()));
    }

    #[tokio::test]
    async fn http_errors_carry_the_backend_message() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/devices/9"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({ "error": "Device in use" })))
            .mount(&server)
            .await;

        let api = ApiClient::new().with_base_url(server.uri());
        let err = api.delete("/api/devices/9").await.unwrap_err();
        assert_eq!(
            err,
            ApiError::Http {
                status: 422,
                message: "Device in use".into()
            }
        );
    }

    #[test]
    fn joins_base_and_path() {
        let api = ApiClient::new().with_base_url("http://localhost:8000/");
        assert_eq!(api.url("/api/roles"), "http://localhost:8000/api/roles");
        assert_eq!(ApiClient::new().url("api/roles"), "/api/roles");
    }
}
