//! Stored prediction handlers: listing and advisory attachment.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Json,
};
use cardio_core::PredictionRecord;
use cardio_llm::AdvisoryProfile;

use crate::dto::{AdvisoryResponse, ListQuery};
use crate::error::AppError;
use crate::ServerState;

/// Lists the newest stored predictions.
pub async fn list(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<PredictionRecord>>, AppError> {
    let records = state.engine.recent_predictions(query.effective_limit())?;
    Ok(Json(records))
}

/// Generates advisory text for a stored prediction.
///
/// The body is an optional [`AdvisoryProfile`]; an empty body uses defaults.
pub async fn advisory(
    State(state): State<Arc<ServerState>>,
    Path(prediction_id): Path<i64>,
    body: Bytes,
) -> Result<Json<AdvisoryResponse>, AppError> {
    let profile = if body.iter().all(u8::is_ascii_whitespace) {
        AdvisoryProfile::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Unprocessable(format!("invalid advisory profile: {}", e)))?
    };

    let advisory = state.engine.attach_advisory(prediction_id, &profile).await?;
    Ok(Json(AdvisoryResponse { prediction_id, advisory }))
}
