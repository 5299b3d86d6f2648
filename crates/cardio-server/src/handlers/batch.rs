//! Batch prediction handler.

use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;

use crate::dto::BatchResponse;
use crate::error::AppError;
use crate::ServerState;

/// Predicts every observation inside the configured lookback window.
pub async fn batch_predict(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<BatchResponse>, AppError> {
    let since = Utc::now() - state.lookback;
    let report = state.engine.predict_batch(since).await?;
    Ok(Json(report.into()))
}
