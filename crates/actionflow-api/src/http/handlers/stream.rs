//! Stream inspection handler.

use std::time::Instant;

use axum::Json;
use axum::extract::State;
use uuid::Uuid;

use actionflow_core::channel::{MessageChannel, StreamInfo};
use actionflow_core::ports::{EntityResolver, MetadataClient};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// GET /stream - Stream occupancy and per-consumer progress.
pub async fn stream_info<M, E, C>(
    State(state): State<AppState<M, E, C>>,
) -> Result<Json<ApiResponse<StreamInfo>>, AppError>
where
    M: MetadataClient + 'static,
    E: EntityResolver + 'static,
    C: MessageChannel + 'static,
{
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let info = state.orchestrator.channel().stream_info().await?;

    let elapsed = start.elapsed().as_millis() as u64;
    Ok(Json(
        ApiResponse::success(info, request_id, elapsed).with_link("self", "/stream"),
    ))
}
