//! Pulseboard development relay
//!
//! A small Axum server speaking the subset of the Pusher protocol the
//! realtime client uses, plus the two HTTP endpoints a dashboard backend
//! would provide: private channel authorization and event publishing.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::RelayConfig;
pub use state::AppState;

/// Build the relay router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Socket
        .route("/app/{key}", get(ws::ws_handler))
        // Backend stand-ins
        .route("/api/broadcasting/auth", post(routes::auth::authorize_channel))
        .route("/api/events", post(routes::events::publish))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
