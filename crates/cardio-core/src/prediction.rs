//! Classifier outcomes and the records that persist them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::observation::HealthObservation;

/// Binary risk class predicted by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum RiskLabel {
    NoRisk = 0,
    AtRisk = 1,
}

impl RiskLabel {
    pub fn code(self) -> i64 {
        self as i64
    }
}

impl TryFrom<i64> for RiskLabel {
    type Error = String;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::NoRisk),
            1 => Ok(Self::AtRisk),
            other => Err(format!("risk label {} is not binary", other)),
        }
    }
}

impl From<RiskLabel> for i64 {
    fn from(label: RiskLabel) -> Self {
        label.code()
    }
}

/// Output of a single classifier invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub label: RiskLabel,
    /// Probability of [`RiskLabel::AtRisk`], absent when the model has no confidence output.
    pub probability: Option<f64>,
}

/// One classifier invocation outcome, with a snapshot of the observation it came from.
///
/// The snapshot carries the originating observation's store id when there is
/// one, so a prediction stays reproducible even if the source row is lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub observation: HealthObservation,
    pub predicted_at: DateTime<Utc>,
    pub label: RiskLabel,
    pub probability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisory: Option<String>,
}

impl PredictionRecord {
    /// Creates an unsaved record stamped with the current time.
    pub fn new(observation: HealthObservation, classification: Classification) -> Self {
        Self {
            id: None,
            observation,
            predicted_at: Utc::now(),
            label: classification.label,
            probability: classification.probability,
            advisory: None,
        }
    }

    pub fn subject_id(&self) -> &str {
        &self.observation.subject_id
    }

    pub fn observation_id(&self) -> Option<i64> {
        self.observation.id
    }

    /// Probability as reported over the wire, where an absent value reads as `0.0`.
    pub fn probability_or_default(&self) -> f64 {
        self.probability.unwrap_or(0.0)
    }
}
