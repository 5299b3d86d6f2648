//! Observation intake handler.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use cardio_core::ObservationInput;

use crate::dto::ObservationCreated;
use crate::error::AppError;
use crate::ServerState;

/// Validates and stores an observation.
pub async fn create(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<ObservationInput>, JsonRejection>,
) -> Result<(StatusCode, Json<ObservationCreated>), AppError> {
    let Json(input) = payload?;
    let observation = state.engine.record_observation(&input)?;
    let id = observation
        .id
        .ok_or_else(|| AppError::Internal("observation was stored without an id".into()))?;
    Ok((StatusCode::CREATED, Json(ObservationCreated { id })))
}
