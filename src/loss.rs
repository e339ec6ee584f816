//! Loss function(s)

use crate::{nn::NNError, values::Value};

/// Mean Squared Error Loss between predictions and targets
pub struct MSELoss;

impl MSELoss {
    pub fn call<T>(y_pred: &[T], y_true: &[f64]) -> Result<Value, NNError>
    where
        T: AsRef<Value>,
    {
        if y_pred.len() != y_true.len() {
            return Err(NNError::ShapeMismatch {
                expected: y_pred.len(),
                got: y_true.len(),
            });
        }
        let Some(first) = y_pred.first() else {
            return Err(NNError::ShapeMismatch {
                expected: 1,
                got: 0,
            });
        };
        let graph = first.as_ref().graph();
        let squared = y_pred
            .iter()
            .zip(y_true.iter())
            .map(|(a, b)| (a.as_ref() - *b).pow(2.0))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(graph.mean(squared))
    }
}

/// "max-margin" (SVM hinge) loss over single scores with targets in {-1, 1}
pub struct MaxMarginLoss;

impl MaxMarginLoss {
    /// Mean of `relu(1 - y * score)`
    pub fn call<T>(scores: &[T], y_true: &[f64]) -> Result<Value, NNError>
    where
        T: AsRef<Value>,
    {
        if scores.len() != y_true.len() || scores.is_empty() {
            return Err(NNError::ShapeMismatch {
                expected: scores.len().max(1),
                got: y_true.len(),
            });
        }
        let graph = scores[0].as_ref().graph();
        let margins = scores
            .iter()
            .zip(y_true.iter())
            .map(|(score, y)| (1.0 - *y * score.as_ref()).relu())
            .collect();
        Ok(graph.mean(margins))
    }
}

/// `alpha * sum(p^2)` over all parameters
pub fn l2_regularization(params: &[Value], alpha: f64) -> Result<Value, NNError> {
    let Some(first) = params.first() else {
        return Err(NNError::ShapeMismatch {
            expected: 1,
            got: 0,
        });
    };
    let squares = params
        .iter()
        .map(|p| p.pow(2.0))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(alpha * first.graph().sum(squares))
}

/// Fraction of predictions matching the labels
pub fn accuracy(predicted: &[usize], labels: &[usize]) -> f64 {
    if predicted.is_empty() {
        return 0.0;
    }
    let correct = predicted
        .iter()
        .zip(labels.iter())
        .filter(|(p, l)| p == l)
        .count();
    correct as f64 / predicted.len() as f64
}

#[cfg(test)]
mod tests {
    use crate::{assert_eq_float, graph::Graph};

    use super::*;

    #[test]
    fn test_mse_loss() {
        let g = Graph::new();
        let y_pred = g.leaves(&[2.0, 3.0]);
        let loss = MSELoss::call(&y_pred, &[1.0, 5.0]).unwrap();
        assert_eq!(loss.data(), 2.5);

        loss.backward();
        // dloss / dy_pred = 1/N * 2 * (y_pred - y_true)
        assert_eq!(y_pred[0].grad(), 1.0);
        assert_eq!(y_pred[1].grad(), -2.0);
    }

    #[test]
    fn test_mse_shape_mismatch() {
        let g = Graph::new();
        let y_pred = g.leaves(&[2.0, 3.0]);
        let err = MSELoss::call(&y_pred, &[1.0]).unwrap_err();
        assert!(matches!(
            err,
            NNError::ShapeMismatch {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_max_margin_loss() {
        let g = Graph::new();
        let scores = g.leaves(&[2.0, 0.5, -0.5]);
        // margins: relu(1 - 2) = 0, relu(1 - 0.5) = 0.5, relu(1 - 0.5) = 0.5
        let loss = MaxMarginLoss::call(&scores, &[1.0, 1.0, -1.0]).unwrap();
        assert_eq_float!(loss.data(), 1.0 / 3.0);

        loss.backward();
        assert_eq_float!(scores[0].grad(), 0.0);
        assert_eq_float!(scores[1].grad(), -1.0 / 3.0);
        assert_eq_float!(scores[2].grad(), 1.0 / 3.0);
    }

    #[test]
    fn test_l2_regularization() {
        let g = Graph::new();
        let params = g.leaves(&[1.0, -2.0]);
        let reg = l2_regularization(&params, 0.5).unwrap();
        assert_eq_float!(reg.data(), 2.5);
        reg.backward();
        // d/dp alpha * p^2 = 2 * alpha * p
        assert_eq_float!(params[0].grad(), 1.0);
        assert_eq_float!(params[1].grad(), -2.0);
    }

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[0, 1, 1, 0], &[0, 1, 0, 0]), 0.75);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }
}
