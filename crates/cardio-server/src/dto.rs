//! Data transfer objects for HTTP message serialization.

use cardio_core::{PredictionRecord, RiskLabel};
use cardio_engine::{BatchReport, PredictionOutcome};
use serde::{Deserialize, Serialize};

/// Default page size for the prediction listing.
pub const DEFAULT_LIST_LIMIT: usize = 20;
/// Largest page the prediction listing will return.
pub const MAX_LIST_LIMIT: usize = 500;

// === Prediction Types ===

/// Response for a single prediction.
///
/// `probability` falls back to `0.0` when the model has no confidence
/// output; `probability_available` tells the two cases apart.
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub prediction_id: Option<i64>,
    pub subject_id: String,
    pub label: RiskLabel,
    pub probability: f64,
    pub probability_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl From<PredictionOutcome> for PredictResponse {
    fn from(outcome: PredictionOutcome) -> Self {
        let record = outcome.record;
        Self {
            prediction_id: record.id,
            subject_id: record.subject_id().to_string(),
            label: record.label,
            probability: record.probability_or_default(),
            probability_available: record.probability.is_some(),
            warning: outcome.warning,
        }
    }
}

// === Batch Types ===

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchPrediction {
    pub subject_id: String,
    pub label: RiskLabel,
    pub probability: f64,
}

impl From<&PredictionRecord> for BatchPrediction {
    fn from(record: &PredictionRecord) -> Self {
        Self {
            subject_id: record.subject_id().to_string(),
            label: record.label,
            probability: record.probability_or_default(),
        }
    }
}

/// Response from a batch prediction run.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub predictions: Vec<BatchPrediction>,
    pub failures: usize,
}

impl From<BatchReport> for BatchResponse {
    fn from(report: BatchReport) -> Self {
        Self {
            predictions: report
                .predictions
                .iter()
                .map(|outcome| BatchPrediction::from(&outcome.record))
                .collect(),
            failures: report.failures,
        }
    }
}

// === Observation Types ===

#[derive(Debug, Serialize, Deserialize)]
pub struct ObservationCreated {
    pub id: i64,
}

// === Listing & Advisory Types ===

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdvisoryResponse {
    pub prediction_id: i64,
    pub advisory: String,
}
