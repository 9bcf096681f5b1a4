//! Reconstruction losses and the optimization rule bound to a compiled autoencoder.
use std::fmt;

use ndarray::{Array, Dimension};

use crate::{layers::Shape, ImagePrecision, ModelError, ModelResult};

/// Predictions are clipped to [EPSILON, 1 - EPSILON] before taking logarithms.
pub const EPSILON: ImagePrecision = 1e-7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    /// Mean binary cross entropy, for targets in [0, 1]
    BinaryCrossentropy,
    MeanSquaredError,
}

impl Loss {
    /// Mean loss over all scalars of the batch.
    pub fn compute<D: Dimension>(
        &self,
        y_true: &Array<ImagePrecision, D>,
        y_pred: &Array<ImagePrecision, D>,
    ) -> ModelResult<ImagePrecision> {
        if y_true.shape() != y_pred.shape() {
            return Err(ModelError::ShapeMismatch {
                context: format!("{} loss", self),
                expected: Shape::from(y_true.shape()),
                found: Shape::from(y_pred.shape()),
            });
        }
        if y_true.is_empty() {
            return Ok(0.0);
        }

        // f64 accumulator, batches hold hundreds of thousands of scalars
        let pairs = y_true
            .iter()
            .zip(y_pred.iter())
            .map(|(&y, &p)| (f64::from(y), f64::from(p)));
        let epsilon = f64::from(EPSILON);
        let total: f64 = match self {
            Loss::BinaryCrossentropy => pairs
                .map(|(y, p)| {
                    let p = p.max(epsilon).min(1.0 - epsilon);
                    -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
                })
                .sum(),
            Loss::MeanSquaredError => pairs.map(|(y, p)| (y - p).powi(2)).sum(),
        };
        Ok((total / y_true.len() as f64) as ImagePrecision)
    }
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loss::BinaryCrossentropy => write!(f, "binary_crossentropy"),
            Loss::MeanSquaredError => write!(f, "mean_squared_error"),
        }
    }
}

/// Optimization rule a compiled model is meant to be trained with.
/// Gradients are computed by the training framework, so only the
/// hyperparameters live here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Optimizer {
    /// Zeiler, "ADADELTA: An Adaptive Learning Rate Method", <https://arxiv.org/abs/1212.5701>
    Adadelta {
        learning_rate: f32,
        rho: f32,
        epsilon: f32,
    },
}

impl Optimizer {
    /// Adadelta with the Keras defaults.
    pub fn adadelta() -> Optimizer {
        Optimizer::Adadelta {
            learning_rate: 1.0,
            rho: 0.95,
            epsilon: 1e-7,
        }
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::adadelta()
    }
}

impl fmt::Display for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Optimizer::Adadelta {
                learning_rate,
                rho,
                epsilon,
            } => write!(
                f,
                "adadelta (learning_rate={}, rho={}, epsilon={:e})",
                learning_rate, rho, epsilon
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_binary_crossentropy() {
        let y_true = array![[1.0, 0.0], [0.5, 1.0]];
        let y_pred = array![[0.5, 0.5], [0.5, 1.0]];
        let loss = Loss::BinaryCrossentropy.compute(&y_true, &y_pred).unwrap();

        // three entries contribute ln 2, the perfect prediction ~0
        let expected = 3.0 * (2.0f32).ln() / 4.0;
        assert!((loss - expected).abs() < 1e-5);
    }

    #[test]
    fn test_binary_crossentropy_is_finite_at_the_borders() {
        let y_true = array![1.0, 0.0];
        let y_pred = array![0.0, 1.0];
        let loss = Loss::BinaryCrossentropy.compute(&y_true, &y_pred).unwrap();
        assert!(loss.is_finite());
        assert!(loss > 10.0);
    }

    #[test]
    fn test_loss_is_stable_over_large_batches() {
        // p = 0.5 gives ln 2 for every target
        let y_true = Array::from_shape_fn((8, 128, 128), |(n, i, j)| {
            ((n * 31 + i * 7 + j) % 256) as f32 / 255.0
        });
        let y_pred = Array::from_elem((8, 128, 128), 0.5f32);
        let loss = Loss::BinaryCrossentropy.compute(&y_true, &y_pred).unwrap();
        assert!((loss - (2.0f32).ln()).abs() < 1e-6);

        // the same images in another batch order give the same loss
        let reordered = y_true.slice(ndarray::s![..;-1, .., ..]).to_owned();
        let reordered_loss = Loss::BinaryCrossentropy
            .compute(&reordered, &y_pred)
            .unwrap();
        assert!((loss - reordered_loss).abs() < 1e-6);
    }

    #[test]
    fn test_mean_squared_error() {
        let y_true = array![1.0, 0.0, 0.5];
        let y_pred = array![0.0, 0.0, 1.0];
        let loss = Loss::MeanSquaredError.compute(&y_true, &y_pred).unwrap();
        assert!((loss - 1.25 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_shape_mismatch() {
        let y_true = array![1.0, 0.0];
        let y_pred = array![1.0, 0.0, 0.0];
        assert!(matches!(
            Loss::MeanSquaredError.compute(&y_true, &y_pred),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_optimizer_defaults() {
        assert_eq!(
            Optimizer::default(),
            Optimizer::Adadelta {
                learning_rate: 1.0,
                rho: 0.95,
                epsilon: 1e-7
            }
        );
        assert!(Optimizer::default().to_string().starts_with("adadelta"));
    }
}
