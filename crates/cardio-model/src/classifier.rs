//! Runtime scaler and classifier evaluation.

use cardio_core::{CardioError, RiskLabel};

use crate::bundle::{ClassifierParams, ScalerParams, TreeNode, TreeParams};

pub(crate) struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub(crate) fn new(params: ScalerParams) -> Self {
        Self { mean: params.mean, scale: params.scale }
    }

    pub(crate) fn transform(&self, values: &[f64]) -> Vec<f64> {
        values
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (mean, scale))| (x - mean) / scale)
            .collect()
    }
}

pub(crate) struct Classifier {
    params: ClassifierParams,
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn linear(coefficients: &[f64], intercept: f64, x: &[f64]) -> f64 {
    coefficients.iter().zip(x).map(|(c, v)| c * v).sum::<f64>() + intercept
}

impl Classifier {
    pub(crate) fn new(params: ClassifierParams) -> Self {
        Self { params }
    }

    /// Model family name for logging.
    pub(crate) fn kind(&self) -> &'static str {
        match self.params {
            ClassifierParams::LogisticRegression { .. } => "logistic_regression",
            ClassifierParams::LinearSvm { .. } => "linear_svm",
            ClassifierParams::RandomForest { .. } => "random_forest",
        }
    }

    pub(crate) fn supports_probability(&self) -> bool {
        !matches!(self.params, ClassifierParams::LinearSvm { .. })
    }

    pub(crate) fn predict(&self, x: &[f64]) -> RiskLabel {
        let positive = match &self.params {
            ClassifierParams::LogisticRegression { coefficients, intercept, threshold } => {
                sigmoid(linear(coefficients, *intercept, x)) > *threshold
            }
            ClassifierParams::LinearSvm { coefficients, intercept } => {
                linear(coefficients, *intercept, x) > 0.0
            }
            ClassifierParams::RandomForest { trees } => forest_probability(trees, x) >= 0.5,
        };
        if positive {
            RiskLabel::AtRisk
        } else {
            RiskLabel::NoRisk
        }
    }

    /// Probability of the at-risk class.
    pub(crate) fn predict_proba(&self, x: &[f64]) -> Result<f64, CardioError> {
        match &self.params {
            ClassifierParams::LogisticRegression { coefficients, intercept, .. } => {
                Ok(sigmoid(linear(coefficients, *intercept, x)))
            }
            ClassifierParams::LinearSvm { .. } => Err(CardioError::Inference(
                "linear_svm does not provide class probabilities".into(),
            )),
            ClassifierParams::RandomForest { trees } => Ok(forest_probability(trees, x)),
        }
    }
}

fn forest_probability(trees: &[TreeParams], x: &[f64]) -> f64 {
    let total: f64 = trees.iter().map(|t| leaf_probability(t, x)).sum();
    total / trees.len() as f64
}

// Child indices are validated to be strictly increasing, so the walk terminates.
fn leaf_probability(tree: &TreeParams, x: &[f64]) -> f64 {
    let mut idx = 0;
    loop {
        match &tree.nodes[idx] {
            TreeNode::Split { feature, threshold, left, right } => {
                idx = if x[*feature] <= *threshold { *left } else { *right };
            }
            TreeNode::Leaf { value } => return value[1] / (value[0] + value[1]),
        }
    }
}
