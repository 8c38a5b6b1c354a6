//! Axum router configuration with middleware.
//!
//! Routes: `GET /health`, `GET /stream` and
//! `POST /trigger/workflow/{workflow_id}`. Middleware: CORS and tracing.

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use actionflow_core::channel::MessageChannel;
use actionflow_core::ports::{EntityResolver, MetadataClient};
use actionflow_observe::attrs::SPAN_HTTP_REQUEST;

use crate::http::handlers;
use crate::state::AppState;

/// Build the trigger router for `state`.
pub fn build_router<M, E, C>(state: AppState<M, E, C>) -> Router
where
    M: MetadataClient + 'static,
    E: EntityResolver + 'static,
    C: MessageChannel + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/stream", get(handlers::stream::stream_info::<M, E, C>))
        .route(
            "/trigger/workflow/{workflow_id}",
            post(handlers::trigger::trigger_workflow::<M, E, C>),
        )
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    SPAN_HTTP_REQUEST,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(cors)
        .with_state(state)
}
