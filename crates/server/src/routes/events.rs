//! Event publishing (`POST /api/events`), standing in for the backend's
//! broadcaster.

use axum::{extract::State, http::StatusCode, Json};
use pulseboard_shared::{
    validate_channel_name, validate_event_name, PublishRequest, PublishResponse,
};

use crate::state::AppState;

pub async fn publish(
    State(state): State<AppState>,
    Json(payload): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, (StatusCode, String)> {
    if !validate_channel_name(&payload.channel) {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Invalid channel name {:?}", payload.channel),
        ));
    }
    if !validate_event_name(&payload.event) {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            format!("Invalid event name {:?}", payload.event),
        ));
    }

    let delivered = state
        .publish(&payload.channel, &payload.event, &payload.data)
        .await;
    tracing::info!(
        "published {} on {} to {} sockets",
        payload.event,
        payload.channel,
        delivered
    );
    Ok(Json(PublishResponse { delivered }))
}
