//! Core domain types and error definitions for the cardio risk service.
//!
//! This crate provides the types shared by every other crate in the workspace:
//!
//! - [`CardioError`] — Error taxonomy for validation, lookup, model and storage failures
//! - [`ObservationInput`] and [`HealthObservation`] — Raw and validated health records
//! - [`FeatureVector`] — The fixed-order numeric vector the classifier consumes
//! - [`PredictionRecord`] and [`Classification`] — Classifier outcomes
//!
//! # Example
//!
//! ```rust
//! use cardio_core::{FeatureVector, ObservationInput, ValidationRules};
//!
//! let input = ObservationInput {
//!     age: Some(52.0),
//!     gender: Some(1),
//!     height: Some(170.0),
//!     weight: Some(70.0),
//!     ap_hi: Some(130.0),
//!     ap_lo: Some(85.0),
//!     cholesterol: Some(1),
//!     gluc: Some(1),
//!     smoke: Some(0),
//!     alco: Some(0),
//!     active: Some(1),
//!     ..Default::default()
//! };
//!
//! let vector = FeatureVector::build(&input, &ValidationRules::default()).unwrap();
//! assert_eq!(vector.get("age"), Some(52.0));
//! ```

mod features;
mod observation;
mod prediction;

use thiserror::Error;

pub use features::{compute_bmi, FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
pub use observation::{
    HealthObservation, Level, ObservationInput, Sex, ValidationRules, ANONYMOUS_SUBJECT,
};
pub use prediction::{Classification, PredictionRecord, RiskLabel};

/// Errors that can occur while validating, classifying or persisting health data.
#[derive(Error, Debug)]
pub enum CardioError {
    /// Input record is missing fields or has values outside their ranges.
    #[error("Invalid health record: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// No data exists to predict from.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The model artifact is missing, corrupt or inconsistent.
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// The classifier could not produce the requested output.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// The record store is unreachable or rejected a read or write.
    #[error("Persistence failed: {0}")]
    Persistence(String),

    /// The chat-completion backend failed to produce advisory text.
    #[error("Advisory generation failed: {0}")]
    Advisory(String),

    /// No advisory backend is configured.
    #[error("Advisory generation is not configured")]
    AdvisoryDisabled,
}

impl CardioError {
    /// Creates a validation error from a single message.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    /// Returns `true` for errors caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }
}
