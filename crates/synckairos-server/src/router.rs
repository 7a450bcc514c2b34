//! Router construction.

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the full axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/sessions", post(handlers::sessions::create))
        .route(
            "/sessions/:id",
            get(handlers::sessions::get).delete(handlers::sessions::delete),
        )
        .route("/sessions/:id/start", post(handlers::sessions::start))
        .route("/sessions/:id/switch", post(handlers::sessions::switch))
        .route("/sessions/:id/pause", post(handlers::sessions::pause))
        .route("/sessions/:id/resume", post(handlers::sessions::resume))
        .route("/sessions/:id/complete", post(handlers::sessions::complete))
        .route(
            "/sessions/:id/participants",
            post(handlers::participants::add),
        )
        .route(
            "/sessions/:id/participants/:pid",
            patch(handlers::participants::adjust_time),
        )
        .route("/time", get(handlers::time::server_time));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(handlers::health::health))
        .route("/ws", get(ws::handler::ws_upgrade))
        .nest("/v1", api)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
