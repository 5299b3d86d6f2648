//! HTTP route handlers for the cardio risk server.

pub mod batch;
pub mod observation;
pub mod predict;
pub mod prediction;

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}
