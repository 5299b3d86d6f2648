//! Feature vectorization.
//!
//! The classifier was fitted on columns in a fixed order. Any deviation
//! silently corrupts predictions, so the order lives in exactly one place.

use crate::observation::{HealthObservation, ObservationInput, ValidationRules};
use crate::CardioError;

/// Number of features the classifier consumes.
pub const FEATURE_COUNT: usize = 12;

/// Column names in the order the scaler and classifier were fitted with.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "age",
    "gender",
    "height",
    "weight",
    "bmi",
    "ap_hi",
    "ap_lo",
    "cholesterol",
    "gluc",
    "smoke",
    "alco",
    "active",
];

/// Body-mass index from height in centimetres and weight in kilograms.
pub fn compute_bmi(height_cm: f64, weight_kg: f64) -> f64 {
    let height_m = height_cm / 100.0;
    weight_kg / (height_m * height_m)
}

/// Fixed-order numeric vector built from a validated observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    /// Orders the observation's measurements into model input.
    pub fn from_observation(obs: &HealthObservation) -> Self {
        Self([
            obs.age,
            obs.sex.code() as f64,
            obs.height,
            obs.weight,
            obs.bmi,
            obs.ap_hi,
            obs.ap_lo,
            obs.cholesterol.code() as f64,
            obs.glucose.code() as f64,
            f64::from(u8::from(obs.smoker)),
            f64::from(u8::from(obs.alcohol)),
            f64::from(u8::from(obs.active)),
        ])
    }

    /// Validates a raw record and vectorizes it.
    pub fn build(input: &ObservationInput, rules: &ValidationRules) -> Result<Self, CardioError> {
        input.validate(rules).map(|obs| Self::from_observation(&obs))
    }

    /// Returns the values in fitted order.
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Looks up a single value by feature name.
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|idx| self.0[idx])
    }
}
