use crate::models::ResetOutput;
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use service_core::error::AppError;

#[derive(Debug, Serialize)]
pub struct PopulateResponse {
    pub queued: usize,
}

/// 200 when every account was handed to a reset build, 207 otherwise.
pub async fn drain_reset_queue(State(state): State<AppState>) -> (StatusCode, Json<ResetOutput>) {
    let (output, error) = state.reset_queue.drain().await;
    if let Some(e) = error {
        tracing::error!(error = %e, "Reset queue drain finished with failures");
    }
    let status = if output.success {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    (status, Json(output))
}

pub async fn populate_reset_queue(
    State(state): State<AppState>,
) -> Result<Json<PopulateResponse>, AppError> {
    let queued = state.reset_queue.populate_reset_queue().await?;
    Ok(Json(PopulateResponse { queued }))
}
