//! Private channel authorization (`POST /api/broadcasting/auth`).

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    Json,
};
use pulseboard_shared::{ChannelAuthRequest, ChannelAuthResponse, ChannelKind};
use serde_json::{json, Value};

use crate::state::AppState;

type Rejection = (StatusCode, Json<Value>);

fn reject(status: StatusCode, message: &str) -> Rejection {
    (status, Json(json!({ "message": message })))
}

/// Channels scoped to one user: `user.<id>` and `transactions.<id>`.
const USER_SCOPED_PREFIXES: [&str; 2] = ["user.", "transactions."];

/// Sign `<socket_id>:<channel_name>` for the bearer of a known token.
pub async fn authorize_channel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ChannelAuthRequest>,
) -> Result<Json<ChannelAuthResponse>, Rejection> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Unauthenticated."))?;
    let user_id = state
        .user_for_token(token)
        .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Unauthenticated."))?;

    let (kind, name) = ChannelKind::from_wire(&payload.channel_name);
    if kind != ChannelKind::Private {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            "Only private channels need authorization.",
        ));
    }

    if !may_join(user_id, name) {
        tracing::warn!("user {} may not join {}", user_id, payload.channel_name);
        return Err(reject(StatusCode::FORBIDDEN, "Forbidden."));
    }

    tracing::debug!(
        "authorized socket {} for {}",
        payload.socket_id,
        payload.channel_name
    );
    Ok(Json(ChannelAuthResponse {
        auth: state.sign_channel(&payload.socket_id, &payload.channel_name),
    }))
}

fn may_join(user_id: &str, channel: &str) -> bool {
    USER_SCOPED_PREFIXES
        .iter()
        .find_map(|prefix| channel.strip_prefix(prefix))
        .map_or(true, |owner| owner == user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_scoped_channels_belong_to_their_owner() {
        assert!(may_join("42", "user.42"));
        assert!(may_join("42", "transactions.42"));
        assert!(!may_join("42", "user.7"));
        assert!(!may_join("42", "transactions.7"));
        assert!(may_join("42", "tiktok-accounts.abc"));
    }
}
