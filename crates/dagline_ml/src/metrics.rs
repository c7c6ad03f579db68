//! Scoring a model against held-out rows.

use crate::model::LogisticModel;
use dagline_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Result of scoring a model on a test set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Predicted class index per test row
    pub predictions: Vec<usize>,
    /// Predicted class name per test row
    pub predicted_labels: Vec<String>,
    /// Share of correct predictions
    pub accuracy: f64,
    /// Number of rows scored
    pub test_rows: usize,
    /// Counts indexed as `[actual][predicted]`
    pub confusion: Vec<Vec<usize>>,
}

impl Evaluation {
    /// Score `model` on `x` against the true labels `y`
    ///
    /// # Errors
    ///
    /// Returns `Schema` if `x` and `y` differ in length or a row does not
    /// fit the model
    pub fn evaluate(model: &LogisticModel, x: &[Vec<f64>], y: &[usize]) -> CoreResult<Self> {
        if x.len() != y.len() {
            return Err(CoreError::Schema {
                reason: format!("{} test rows but {} labels", x.len(), y.len()),
            });
        }

        let predictions = model.predict(x)?;
        let predicted_labels = predictions
            .iter()
            .map(|&p| model.classes().get(p).cloned().unwrap_or_default())
            .collect();

        Ok(Self {
            accuracy: accuracy(&predictions, y),
            confusion: confusion_matrix(&predictions, y, model.classes().len()),
            test_rows: x.len(),
            predictions,
            predicted_labels,
        })
    }

    /// Number of correct predictions
    #[must_use]
    pub fn correct(&self) -> usize {
        (0..self.confusion.len())
            .filter_map(|i| self.confusion[i].get(i))
            .sum()
    }
}

/// Share of positions where `predicted` matches `actual`; 0.0 for no rows
#[must_use]
pub fn accuracy(predicted: &[usize], actual: &[usize]) -> f64 {
    if actual.is_empty() {
        return 0.0;
    }
    let correct = predicted.iter().zip(actual).filter(|(p, a)| p == a).count();
    correct as f64 / actual.len() as f64
}

/// Square matrix of `[actual][predicted]` counts; out-of-range labels are ignored
#[must_use]
pub fn confusion_matrix(predicted: &[usize], actual: &[usize], classes: usize) -> Vec<Vec<usize>> {
    let mut matrix = vec![vec![0; classes]; classes];
    for (&p, &a) in predicted.iter().zip(actual) {
        if let Some(cell) = matrix.get_mut(a).and_then(|row| row.get_mut(p)) {
            *cell += 1;
        }
    }
    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TrainConfig;

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[0, 1, 1, 0], &[0, 1, 0, 0]), 0.75);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn test_confusion_matrix() {
        let m = confusion_matrix(&[0, 1, 1, 2], &[0, 1, 0, 2], 3);
        assert_eq!(m, vec![vec![1, 1, 0], vec![0, 1, 0], vec![0, 0, 1]]);
    }

    #[test]
    fn test_evaluate() {
        let x = vec![vec![0.0], vec![0.1], vec![0.9], vec![1.0]];
        let y = vec![0, 0, 1, 1];
        let names = vec!["no".to_string(), "yes".to_string()];
        let model = LogisticModel::fit(&x, &y, &names, &TrainConfig::default()).unwrap();

        let eval = Evaluation::evaluate(&model, &x, &y).unwrap();
        assert_eq!(eval.test_rows, 4);
        assert_eq!(eval.accuracy, 1.0);
        assert_eq!(eval.correct(), 4);
        assert_eq!(eval.predicted_labels, ["no", "no", "yes", "yes"]);
    }

    #[test]
    fn test_evaluate_length_mismatch() {
        let x = vec![vec![0.0], vec![1.0]];
        let names = vec!["a".to_string(), "b".to_string()];
        let model = LogisticModel::fit(&x, &[0, 1], &names, &TrainConfig::default()).unwrap();
        assert!(Evaluation::evaluate(&model, &x, &[0]).is_err());
    }
}
