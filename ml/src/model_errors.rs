use crate::{layers::Shape, weight_loader::WeightError};
use ndarray::ShapeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Unknown model name {0}")]
    UnknownArchitecture(String),
    #[error("Shape mismatch in {context}: expected {expected}, got {found}")]
    ShapeMismatch {
        context: String,
        expected: Shape,
        found: Shape,
    },
    #[error("{layer} layer cannot be applied to input of shape {shape}")]
    InvalidInput { layer: &'static str, shape: Shape },
    #[error("Invalid {layer} configuration: {reason}")]
    InvalidLayer { layer: &'static str, reason: String },
    #[error("Tensor could not be brought into the required layout:\n {0}.")]
    Layout(#[from] ShapeError),
    #[error(transparent)]
    Weights(#[from] WeightError),
}
