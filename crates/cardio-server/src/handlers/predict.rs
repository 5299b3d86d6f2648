//! Single-record prediction handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use cardio_core::ObservationInput;
use tracing::info;

use crate::dto::PredictResponse;
use crate::error::AppError;
use crate::ServerState;

/// Predicts risk for an observation supplied in the request body.
pub async fn predict(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<ObservationInput>, JsonRejection>,
) -> Result<Json<PredictResponse>, AppError> {
    let Json(input) = payload?;
    let outcome = state.engine.predict_one(&input)?;

    info!(
        "Predicted {:?} for {} (prediction {:?})",
        outcome.record.label,
        outcome.record.subject_id(),
        outcome.record.id
    );
    Ok(Json(outcome.into()))
}

/// Predicts risk from a subject's newest stored observation.
pub async fn predict_subject(
    State(state): State<Arc<ServerState>>,
    Path(subject_id): Path<String>,
) -> Result<Json<PredictResponse>, AppError> {
    let outcome = state.engine.predict_latest_for_subject(&subject_id)?;
    Ok(Json(outcome.into()))
}
