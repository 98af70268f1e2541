//! Loss functions
//!
//! [`compute_mse`] evaluates mean squared error and its gradient in closed form on plain
//! floats. [`MSELoss`] and [`CrossEntropyLoss`] build the same kind of loss out of
//! [`Value`]s so gradients come from [`Value::backward`].

use thiserror::Error;

use crate::values::{Value, ValueError};

/// Errors for loss evaluation
#[derive(Debug, Error, PartialEq)]
pub enum LossError {
    #[error(
        "Predictions and targets must have the same length, got {predictions} predictions and {targets} targets"
    )]
    ShapeMismatch { predictions: usize, targets: usize },
    #[error("Loss is undefined for empty inputs")]
    EmptyInput,
    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Checks that predictions and targets are non-empty and of equal length
fn check_shapes(predictions: usize, targets: usize) -> Result<(), LossError> {
    if predictions != targets {
        return Err(LossError::ShapeMismatch {
            predictions,
            targets,
        });
    }
    if predictions == 0 {
        return Err(LossError::EmptyInput);
    }
    Ok(())
}

/// Mean squared error and its gradient with respect to the predictions
#[derive(Debug, Clone, PartialEq)]
pub struct MseOutput {
    pub loss: f64,
    /// `gradient[i]` is d loss / d predictions[i]
    pub gradient: Vec<f64>,
}

/// Computes `loss = 1/n * sum((p - t)^2)` and `gradient[i] = 2/n * (p[i] - t[i])`
pub fn compute_mse(predictions: &[f64], targets: &[f64]) -> Result<MseOutput, LossError> {
    check_shapes(predictions.len(), targets.len())?;
    let n = predictions.len() as f64;
    let diffs = predictions
        .iter()
        .zip(targets.iter())
        .map(|(p, t)| p - t)
        .collect::<Vec<_>>();
    let loss = diffs.iter().map(|d| d * d).sum::<f64>() / n;
    let gradient = diffs.iter().map(|d| 2.0 / n * d).collect();
    Ok(MseOutput { loss, gradient })
}

/// Mean Squared Error Loss between two vectors of values
pub struct MSELoss;

impl MSELoss {
    pub fn call<T, U>(y_pred: &[T], y_true: &[U]) -> Result<Value, LossError>
    where
        T: AsRef<Value>,
        U: AsRef<Value>,
    {
        check_shapes(y_pred.len(), y_true.len())?;
        let loss = y_pred
            .iter()
            .zip(y_true.iter())
            .map(|(a, b)| (a.as_ref() - b.as_ref()).pow(2.0))
            .sum::<Value>();
        Ok(loss / Value::new(y_pred.len() as f64))
    }
}

/// Cross entropy between the softmax of `logits` and a target distribution
///
/// `targets` are class probabilities (one-hot or soft) and are expected to sum to one,
/// which is what makes the gradient on the logits reduce to `softmax(logits) - targets`.
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    pub fn call<T, U>(logits: &[T], targets: &[U]) -> Result<Value, LossError>
    where
        T: AsRef<Value>,
        U: AsRef<Value>,
    {
        check_shapes(logits.len(), targets.len())?;
        // log softmax as `(x_i - max) - log(sum_j exp(x_j - max))`, the sum includes
        // `exp(0) = 1` so its logarithm is always defined, even when some probabilities
        // underflow to zero
        let max = logits
            .iter()
            .map(|v| v.as_ref().data())
            .fold(f64::NEG_INFINITY, f64::max);
        let shift = Value::new(if max.is_finite() { max } else { 0.0 });
        let shifted = logits
            .iter()
            .map(|v| v.as_ref() - &shift)
            .collect::<Vec<_>>();
        let log_sum_exp = shifted.iter().map(|v| v.exp()).sum::<Value>().log()?;
        let log_likelihood = shifted
            .iter()
            .zip(targets.iter())
            .map(|(s, t)| &(s - &log_sum_exp) * t.as_ref())
            .sum::<Value>();
        Ok(-&log_likelihood)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_eq_float;

    #[test]
    fn test_compute_mse() {
        let out = compute_mse(&[3.0, 4.0, 5.0], &[3.3, 4.2, 5.1]).unwrap();
        assert_eq_float!(out.loss, 0.14 / 3.0);
        assert_eq!(out.gradient.len(), 3);
        assert_eq_float!(out.gradient[0], -0.2);
        assert_eq_float!(out.gradient[1], -0.4 / 3.0);
        assert_eq_float!(out.gradient[2], -0.2 / 3.0);
    }

    #[test]
    fn test_compute_mse_equal_inputs() {
        let out = compute_mse(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(out.loss, 0.0);
        assert_eq!(out.gradient, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_compute_mse_single_element() {
        let out = compute_mse(&[2.0], &[-1.0]).unwrap();
        assert_eq!(out.loss, 9.0);
        assert_eq!(out.gradient, vec![6.0]);
    }

    #[test]
    fn test_compute_mse_sign_and_non_negative() {
        let predictions = [0.5, -2.0, 7.25, 1.0, -0.125];
        let targets = [1.5, -3.0, 7.0, 1.0, 4.0];
        let out = compute_mse(&predictions, &targets).unwrap();
        assert!(out.loss > 0.0);
        for ((p, t), g) in predictions.iter().zip(targets.iter()).zip(out.gradient.iter()) {
            let diff: f64 = p - t;
            if diff == 0.0 {
                assert_eq!(*g, 0.0);
            } else {
                assert_eq!(g.signum(), diff.signum());
            }
        }
    }

    #[test]
    fn test_compute_mse_does_not_mutate_inputs() {
        let predictions = vec![3.0, 4.0, 5.0];
        let targets = vec![3.3, 4.2, 5.1];
        let first = compute_mse(&predictions, &targets).unwrap();
        let second = compute_mse(&predictions, &targets).unwrap();
        assert_eq!(first, second);
        assert_eq!(predictions, vec![3.0, 4.0, 5.0]);
        assert_eq!(targets, vec![3.3, 4.2, 5.1]);
    }

    #[test]
    fn test_compute_mse_errors() {
        assert_eq!(
            compute_mse(&[1.0, 2.0, 3.0], &[1.0, 2.0]).unwrap_err(),
            LossError::ShapeMismatch {
                predictions: 3,
                targets: 2
            }
        );
        assert_eq!(compute_mse(&[], &[]).unwrap_err(), LossError::EmptyInput);
        // mismatch is reported before emptiness
        assert!(matches!(
            compute_mse(&[], &[1.0]),
            Err(LossError::ShapeMismatch {
                predictions: 0,
                targets: 1
            })
        ));
    }

    #[test]
    fn test_mse_loss() {
        let y_pred = vec![Value::new(2.0), Value::new(3.0)];
        let y_true = vec![Value::new(1.0), Value::new(5.0)];
        let loss = MSELoss::call(&y_pred, &y_true).unwrap();
        assert_eq!(loss.data(), 2.5);

        loss.backward();
        // dloss / dy_pred = 1/N * 2 * (y_pred - y_true)
        // dloss / dy_true = -1/N * 2 * (y_pred - y_true)
        assert_eq!(y_pred[0].grad(), 1.0);
        assert_eq!(y_pred[1].grad(), -2.0);
        assert_eq!(y_true[0].grad(), -1.0);
        assert_eq!(y_true[1].grad(), 2.0);
    }

    #[test]
    fn test_mse_loss_matches_closed_form() {
        let predictions = [3.0, 4.0, 5.0];
        let targets = [3.3, 4.2, 5.1];
        let expected = compute_mse(&predictions, &targets).unwrap();

        let y_pred = predictions.iter().map(|&p| Value::new(p)).collect::<Vec<_>>();
        let y_true = targets.iter().map(|&t| Value::new(t)).collect::<Vec<_>>();
        let loss = MSELoss::call(&y_pred, &y_true).unwrap();
        loss.backward();

        assert_eq_float!(loss.data(), expected.loss);
        for (v, g) in y_pred.iter().zip(expected.gradient.iter()) {
            assert_eq_float!(v.grad(), *g);
        }
    }

    #[test]
    fn test_mse_loss_errors() {
        let y_pred = vec![Value::new(1.0)];
        let y_true: Vec<Value> = vec![];
        assert!(matches!(
            MSELoss::call(&y_pred, &y_true),
            Err(LossError::ShapeMismatch {
                predictions: 1,
                targets: 0
            })
        ));
        let empty: Vec<Value> = vec![];
        assert!(matches!(
            MSELoss::call(&empty, &empty),
            Err(LossError::EmptyInput)
        ));
    }

    #[test]
    fn test_cross_entropy_one_hot() {
        let logits = vec![Value::new(1.0), Value::new(2.0), Value::new(0.5)];
        let targets = vec![Value::new(0.0), Value::new(1.0), Value::new(0.0)];
        let loss = CrossEntropyLoss::call(&logits, &targets).unwrap();

        let exp_sum = 1.0f64.exp() + 2.0f64.exp() + 0.5f64.exp();
        let softmax = [
            1.0f64.exp() / exp_sum,
            2.0f64.exp() / exp_sum,
            0.5f64.exp() / exp_sum,
        ];
        assert_eq_float!(loss.data(), -softmax[1].ln());

        loss.backward();
        // dloss / dlogit_i = softmax_i - target_i
        assert_eq_float!(logits[0].grad(), softmax[0]);
        assert_eq_float!(logits[1].grad(), softmax[1] - 1.0);
        assert_eq_float!(logits[2].grad(), softmax[2]);
    }

    #[test]
    fn test_cross_entropy_soft_targets() {
        let logits = vec![Value::new(0.0), Value::new(0.0)];
        let targets = vec![Value::new(0.25), Value::new(0.75)];
        let loss = CrossEntropyLoss::call(&logits, &targets).unwrap();
        // uniform softmax, -sum(t * ln(0.5)) = ln(2)
        assert_eq_float!(loss.data(), 2.0f64.ln());

        loss.backward();
        assert_eq_float!(logits[0].grad(), 0.5 - 0.25);
        assert_eq_float!(logits[1].grad(), 0.5 - 0.75);
    }

    #[test]
    fn test_cross_entropy_errors() {
        let logits = vec![Value::new(0.0), Value::new(1.0)];
        let targets = vec![Value::new(1.0)];
        assert!(matches!(
            CrossEntropyLoss::call(&logits, &targets),
            Err(LossError::ShapeMismatch {
                predictions: 2,
                targets: 1
            })
        ));
    }

    #[test]
    fn test_cross_entropy_underflowing_probabilities() {
        // exp(-1000) underflows, the target class still has probability one
        let logits = vec![Value::new(0.0), Value::new(-1000.0)];
        let targets = vec![Value::new(1.0), Value::new(0.0)];
        let loss = CrossEntropyLoss::call(&logits, &targets).unwrap();
        assert_eq!(loss.data(), 0.0);
        loss.backward();
        assert_eq_float!(logits[0].grad(), 0.0);
        assert_eq_float!(logits[1].grad(), 0.0);

        // the target class itself underflows, -log p = 800
        let logits = vec![Value::new(0.0), Value::new(-800.0)];
        let targets = vec![Value::new(0.0), Value::new(1.0)];
        let loss = CrossEntropyLoss::call(&logits, &targets).unwrap();
        assert_eq_float!(loss.data(), 800.0);
        loss.backward();
        // dloss / dlogit_i = softmax_i - target_i
        assert_eq_float!(logits[0].grad(), 1.0);
        assert_eq_float!(logits[1].grad(), -1.0);
    }

    #[test]
    fn test_mse_loss_large_input() {
        let n = 200_000;
        let predictions = (0..n).map(|i| (i % 7) as f64).collect::<Vec<_>>();
        let targets = (0..n).map(|i| (i % 5) as f64).collect::<Vec<_>>();
        let expected = compute_mse(&predictions, &targets).unwrap();

        let y_pred = predictions.iter().map(|&p| Value::new(p)).collect::<Vec<_>>();
        let y_true = targets.iter().map(|&t| Value::new(t)).collect::<Vec<_>>();
        let loss = MSELoss::call(&y_pred, &y_true).unwrap();
        loss.backward();

        assert_eq_float!(loss.data(), expected.loss);
        for i in [0, 1, 12_345, n - 1] {
            assert_eq_float!(y_pred[i].grad(), expected.gradient[i]);
        }
    }
}
