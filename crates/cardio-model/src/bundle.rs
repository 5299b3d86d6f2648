//! On-disk model bundle format.
//!
//! A bundle is a single JSON document exported by the training process:
//!
//! ```json
//! {
//!   "feature_names": ["age", "gender", "height", "weight", "bmi", "ap_hi", "ap_lo",
//!                     "cholesterol", "gluc", "smoke", "alco", "active"],
//!   "scaler": { "mean": [...], "scale": [...] },
//!   "classifier": { "type": "logistic_regression", "coefficients": [...], "intercept": -0.1 }
//! }
//! ```

use cardio_core::{CardioError, FEATURE_COUNT, FEATURE_NAMES};
use serde::{Deserialize, Serialize};

/// Serialized scaler, classifier and the feature order they were fitted with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub feature_names: Vec<String>,
    pub scaler: ScalerParams,
    pub classifier: ClassifierParams,
}

/// Standard-score scaler: `(x - mean) / scale`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalerParams {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

/// Fitted classifier parameters, tagged by model family.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassifierParams {
    LogisticRegression {
        coefficients: Vec<f64>,
        intercept: f64,
        #[serde(default = "default_threshold")]
        threshold: f64,
    },
    /// Margin classifier without a confidence output.
    LinearSvm {
        coefficients: Vec<f64>,
        intercept: f64,
    },
    RandomForest {
        trees: Vec<TreeParams>,
    },
}

fn default_threshold() -> f64 {
    0.5
}

/// A single decision tree in pre-order: children always follow their parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeParams {
    pub nodes: Vec<TreeNode>,
}

/// Split nodes send `x[feature] <= threshold` left; leaves hold per-class sample counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: [f64; 2],
    },
}

fn unavailable(message: impl Into<String>) -> CardioError {
    CardioError::ModelUnavailable(message.into())
}

impl ModelBundle {
    /// Checks that the bundle matches the service's feature layout and is numerically sound.
    pub fn validate(&self) -> Result<(), CardioError> {
        if self.feature_names.len() != FEATURE_COUNT
            || self.feature_names.iter().zip(FEATURE_NAMES).any(|(a, b)| a != b)
        {
            return Err(unavailable(format!(
                "feature names {:?} do not match expected order {:?}",
                self.feature_names, FEATURE_NAMES
            )));
        }

        check_len("scaler.mean", &self.scaler.mean)?;
        check_len("scaler.scale", &self.scaler.scale)?;
        if self.scaler.mean.iter().any(|m| !m.is_finite()) {
            return Err(unavailable("scaler.mean contains non-finite values"));
        }
        if self.scaler.scale.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(unavailable("scaler.scale must be finite and non-zero"));
        }

        match &self.classifier {
            ClassifierParams::LogisticRegression { coefficients, intercept, threshold } => {
                check_linear(coefficients, *intercept)?;
                if !(0.0..=1.0).contains(threshold) {
                    return Err(unavailable(format!("threshold {} outside [0, 1]", threshold)));
                }
            }
            ClassifierParams::LinearSvm { coefficients, intercept } => {
                check_linear(coefficients, *intercept)?;
            }
            ClassifierParams::RandomForest { trees } => {
                if trees.is_empty() {
                    return Err(unavailable("random forest has no trees"));
                }
                for (idx, tree) in trees.iter().enumerate() {
                    tree.validate()
                        .map_err(|e| unavailable(format!("tree {}: {}", idx, e)))?;
                }
            }
        }

        Ok(())
    }
}

impl TreeParams {
    fn validate(&self) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("no nodes".into());
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split { feature, threshold, left, right } => {
                    if *feature >= FEATURE_COUNT {
                        return Err(format!("node {} splits on unknown feature {}", idx, feature));
                    }
                    if !threshold.is_finite() {
                        return Err(format!("node {} has a non-finite threshold", idx));
                    }
                    for child in [left, right] {
                        if *child <= idx || *child >= self.nodes.len() {
                            return Err(format!("node {} has invalid child {}", idx, child));
                        }
                    }
                }
                TreeNode::Leaf { value } => {
                    if value.iter().any(|v| !v.is_finite() || *v < 0.0) || value[0] + value[1] <= 0.0 {
                        return Err(format!("leaf {} has invalid class counts", idx));
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_len(name: &str, values: &[f64]) -> Result<(), CardioError> {
    if values.len() != FEATURE_COUNT {
        return Err(unavailable(format!(
            "{} has {} values, expected {}",
            name,
            values.len(),
            FEATURE_COUNT
        )));
    }
    Ok(())
}

fn check_linear(coefficients: &[f64], intercept: f64) -> Result<(), CardioError> {
    check_len("classifier.coefficients", coefficients)?;
    if coefficients.iter().any(|c| !c.is_finite()) || !intercept.is_finite() {
        return Err(unavailable("classifier has non-finite parameters"));
    }
    Ok(())
}
