//! Scaler/model adapter for the cardio risk classifier.
//!
//! This crate wraps the externally trained artifacts the service depends on:
//!
//! - [`ModelBundle`] — JSON bundle holding a fitted scaler, a classifier and the feature order
//! - [`RiskModel`] — Immutable, loaded model handle
//! - [`RiskClassifier`] — Seam through which the orchestrator receives a classifier
//!
//! # Loading
//!
//! ```rust,ignore
//! use cardio_model::{RiskClassifier, RiskModel};
//!
//! let model = RiskModel::load("models/cardio_model.json")?;
//! let outcome = model.classify(&vector)?;
//! ```
//!
//! Loading is the only fallible step that touches the filesystem. Once loaded,
//! the model is never mutated and can be shared across tasks behind an `Arc`.

mod bundle;
mod classifier;

use std::fs;
use std::path::Path;

use cardio_core::{CardioError, Classification, FeatureVector};
use tracing::{debug, info};

pub use bundle::{ClassifierParams, ModelBundle, ScalerParams, TreeNode, TreeParams};

use crate::classifier::{Classifier, StandardScaler};

/// Anything that can turn a feature vector into a risk classification.
pub trait RiskClassifier: Send + Sync {
    fn classify(&self, features: &FeatureVector) -> Result<Classification, CardioError>;
}

/// A loaded scaler + classifier pair.
pub struct RiskModel {
    scaler: StandardScaler,
    classifier: Classifier,
}

impl RiskModel {
    /// Reads and validates a model bundle from disk.
    ///
    /// Every failure maps to [`CardioError::ModelUnavailable`]; callers are
    /// expected to treat it as fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CardioError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            CardioError::ModelUnavailable(format!("failed to read '{}': {}", path.display(), e))
        })?;
        let bundle: ModelBundle = serde_json::from_str(&content).map_err(|e| {
            CardioError::ModelUnavailable(format!("failed to parse '{}': {}", path.display(), e))
        })?;

        let model = Self::from_bundle(bundle)?;
        info!("Loaded {} model from {}", model.kind(), path.display());
        Ok(model)
    }

    /// Builds a model from an in-memory bundle.
    pub fn from_bundle(bundle: ModelBundle) -> Result<Self, CardioError> {
        bundle.validate()?;
        Ok(Self {
            scaler: StandardScaler::new(bundle.scaler),
            classifier: Classifier::new(bundle.classifier),
        })
    }

    /// Model family name (e.g. `logistic_regression`).
    pub fn kind(&self) -> &'static str {
        self.classifier.kind()
    }

    pub fn supports_probability(&self) -> bool {
        self.classifier.supports_probability()
    }
}

impl RiskClassifier for RiskModel {
    fn classify(&self, features: &FeatureVector) -> Result<Classification, CardioError> {
        let scaled = self.scaler.transform(features.as_slice());
        let label = self.classifier.predict(&scaled);

        let probability = match self.classifier.predict_proba(&scaled) {
            Ok(p) if p.is_finite() => Some(p.clamp(0.0, 1.0)),
            Ok(p) => {
                debug!("Discarding non-finite probability {}", p);
                None
            }
            Err(e) => {
                debug!("Probability unavailable: {}", e);
                None
            }
        };

        Ok(Classification { label, probability })
    }
}
