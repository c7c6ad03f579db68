//! One-vs-rest logistic regression.
//!
//! Training is full-batch gradient descent from zero weights with a fixed
//! number of epochs, so the same data and config always produce the same
//! model, bit for bit.

use dagline_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Training hyperparameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Passes over the training set
    pub epochs: usize,
    /// Gradient step size
    pub learning_rate: f64,
    /// L2 penalty on the weights (not the bias)
    pub l2: f64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 500,
            learning_rate: 0.5,
            l2: 1e-4,
        }
    }
}

impl TrainConfig {
    /// Check the hyperparameters
    ///
    /// # Errors
    ///
    /// Returns `Fit` for zero epochs, a non-positive learning rate or a
    /// negative penalty
    pub fn validate(&self) -> CoreResult<()> {
        if self.epochs == 0 {
            return Err(fit("epochs must be positive"));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(fit(format!("invalid learning rate {}", self.learning_rate)));
        }
        if !(self.l2.is_finite() && self.l2 >= 0.0) {
            return Err(fit(format!("invalid l2 penalty {}", self.l2)));
        }
        Ok(())
    }
}

/// Trained classifier with one binary model per class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    classes: Vec<String>,
    feature_count: usize,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    config: TrainConfig,
}

impl LogisticModel {
    /// Fit a model; `y` holds indices into `classes`
    ///
    /// # Errors
    ///
    /// Returns `Fit` for empty input, mismatched lengths, ragged rows,
    /// non-finite values, out-of-range labels, fewer than two classes or a
    /// diverged solution
    pub fn fit(x: &[Vec<f64>], y: &[usize], classes: &[String], config: &TrainConfig) -> CoreResult<Self> {
        config.validate()?;
        let feature_count = check_inputs(x, y, classes)?;

        let n = x.len() as f64;
        let mut weights = Vec::with_capacity(classes.len());
        let mut bias = Vec::with_capacity(classes.len());

        for class in 0..classes.len() {
            let targets: Vec<f64> = y.iter().map(|&l| if l == class { 1.0 } else { 0.0 }).collect();
            let mut w = vec![0.0; feature_count];
            let mut b = 0.0;

            for _ in 0..config.epochs {
                let mut grad_w = vec![0.0; feature_count];
                let mut grad_b = 0.0;

                for (row, target) in x.iter().zip(&targets) {
                    let err = sigmoid(dot(&w, row) + b) - target;
                    for (g, v) in grad_w.iter_mut().zip(row) {
                        *g += err * v;
                    }
                    grad_b += err;
                }

                for (wj, g) in w.iter_mut().zip(&grad_w) {
                    *wj -= config.learning_rate * (g / n + config.l2 * *wj);
                }
                b -= config.learning_rate * grad_b / n;
            }

            if !(b.is_finite() && w.iter().all(|v| v.is_finite())) {
                return Err(fit(format!("training diverged for class {}", classes[class])));
            }
            weights.push(w);
            bias.push(b);
        }

        debug!(
            rows = x.len(),
            features = feature_count,
            classes = classes.len(),
            epochs = config.epochs,
            "model fitted"
        );

        Ok(Self {
            classes: classes.to_vec(),
            feature_count,
            weights,
            bias,
            config: *config,
        })
    }

    /// Per-class probability from each binary model
    ///
    /// # Errors
    ///
    /// Returns `Schema` if the row width differs from the training data
    pub fn scores(&self, row: &[f64]) -> CoreResult<Vec<f64>> {
        if row.len() != self.feature_count {
            return Err(CoreError::Schema {
                reason: format!(
                    "row has {} features, model expects {}",
                    row.len(),
                    self.feature_count
                ),
            });
        }
        Ok(self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| sigmoid(dot(w, row) + b))
            .collect())
    }

    /// Most likely class index; ties go to the lower index
    ///
    /// # Errors
    ///
    /// Returns `Schema` if the row width differs from the training data
    pub fn predict_one(&self, row: &[f64]) -> CoreResult<usize> {
        let scores = self.scores(row)?;
        let best = scores
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(bi, bs), (i, &s)| if s > bs { (i, s) } else { (bi, bs) });
        Ok(best.0)
    }

    /// Predict every row
    ///
    /// # Errors
    ///
    /// Returns `Schema` if any row width differs from the training data
    pub fn predict(&self, x: &[Vec<f64>]) -> CoreResult<Vec<usize>> {
        x.iter().map(|row| self.predict_one(row)).collect()
    }

    /// Class names in index order
    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Expected row width
    #[must_use]
    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    /// Hyperparameters used for training
    #[must_use]
    pub fn config(&self) -> &TrainConfig {
        &self.config
    }
}

/// Returns the feature count of a well-formed training set
fn check_inputs(x: &[Vec<f64>], y: &[usize], classes: &[String]) -> CoreResult<usize> {
    let Some(first) = x.first() else {
        return Err(fit("no training rows"));
    };
    if x.len() != y.len() {
        return Err(fit(format!("{} rows but {} labels", x.len(), y.len())));
    }
    let width = first.len();
    if width == 0 {
        return Err(fit("rows have no features"));
    }
    if let Some(idx) = x.iter().position(|row| row.len() != width) {
        return Err(fit(format!("row {} has {} features, expected {}", idx, x[idx].len(), width)));
    }
    if x.iter().flatten().any(|v| !v.is_finite()) {
        return Err(fit("non-finite feature value"));
    }
    if classes.len() < 2 {
        return Err(fit(format!("need at least 2 classes, got {}", classes.len())));
    }
    if let Some(&bad) = y.iter().find(|&&l| l >= classes.len()) {
        return Err(fit(format!("label index {} out of range for {} classes", bad, classes.len())));
    }
    if y.iter().all(|&l| l == y[0]) {
        return Err(fit("training labels contain a single class"));
    }
    Ok(width)
}

fn dot(w: &[f64], x: &[f64]) -> f64 {
    w.iter().zip(x).map(|(a, b)| a * b).sum()
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn fit(reason: impl Into<String>) -> CoreError {
    CoreError::Fit {
        reason: reason.into(),
    }
}
