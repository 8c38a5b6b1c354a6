//! Workflow trigger handler.

use std::time::Instant;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use uuid::Uuid;

use actionflow_core::channel::MessageChannel;
use actionflow_core::orchestrator::DispatchReport;
use actionflow_core::ports::{EntityResolver, MetadataClient};
use actionflow_types::workflow::TriggerPayload;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// POST /trigger/workflow/{workflow_id} - Dispatch every step of a workflow.
///
/// The body is an optional JSON `TriggerPayload`; an empty body triggers the
/// workflow without an entity. Succeeds only when every step was published.
pub async fn trigger_workflow<M, E, C>(
    State(state): State<AppState<M, E, C>>,
    Path(workflow_id): Path<String>,
    body: Bytes,
) -> Result<Json<ApiResponse<DispatchReport>>, AppError>
where
    M: MetadataClient + 'static,
    E: EntityResolver + 'static,
    C: MessageChannel + 'static,
{
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let trigger = parse_trigger(&body)?;
    tracing::debug!(%request_id, %workflow_id, has_entity = trigger.has_entity(), "trigger received");

    let report = state
        .orchestrator
        .trigger_workflow(&workflow_id, trigger)
        .await?
        .into_result()?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(report, request_id, elapsed)
        .with_link("self", &format!("/trigger/workflow/{workflow_id}"))
        .with_link("stream", "/stream");

    Ok(Json(resp))
}

fn parse_trigger(body: &[u8]) -> Result<TriggerPayload, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TriggerPayload::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("invalid trigger payload: {e}")))
}
