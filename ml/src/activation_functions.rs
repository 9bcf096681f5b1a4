//! Activation functions used by the autoencoders: relu, elu and sigmoid.
//!
//! The parametrized layers carry an [`Activation`] and apply it in place after
//! their affine part.
use std::fmt;

use ndarray::*;

use crate::ImagePrecision;

/// Exponential linear unit with alpha = 1, as in Keras.
fn elu_scalar(x: ImagePrecision) -> ImagePrecision {
    if x > 0. {
        x
    } else {
        x.exp_m1()
    }
}

/// Logistic sigmoid, squashes into (0, 1).
fn sigmoid_scalar(x: ImagePrecision) -> ImagePrecision {
    1. / (1. + (-x).exp())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Linear,
    Relu,
    Elu,
    Sigmoid,
}

impl Activation {
    /// Applies the activation in place and hands the array back.
    pub fn activate<D: Dimension>(
        &self,
        data: Array<ImagePrecision, D>,
    ) -> Array<ImagePrecision, D> {
        match self {
            Activation::Linear => data,
            Activation::Relu => data.mapv_into(|x| x.max(0.)),
            Activation::Elu => data.mapv_into(elu_scalar),
            Activation::Sigmoid => data.mapv_into(sigmoid_scalar),
        }
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Activation::Linear => "linear",
            Activation::Relu => "relu",
            Activation::Elu => "elu",
            Activation::Sigmoid => "sigmoid",
        };
        write!(f, "{}", name)
    }
}
