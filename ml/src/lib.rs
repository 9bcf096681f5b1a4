//! Layers, containers and the catalog of convolutional autoencoders working on
//! 128x128 grayscale images.
//!
//! All tensors are batched `ndarray`s. Images travel through the layers in
//! (batch, height, width, channels) layout, flat features as (batch, units).
use ndarray::ArrayD;

pub mod activation_functions;
pub mod architectures;
pub mod convolutions;
pub mod fully_connected;
pub mod layers;
pub mod losses;
mod model_errors;
pub mod models;
pub mod pooling;
pub mod session;
pub mod transposed_convolutions;
pub mod weight_loader;

pub use architectures::{build, Architecture};
pub use model_errors::ModelError;
pub use models::{compile_autoencoder, Autoencoder, Sequential};

pub type WeightPrecision = f32;
pub type ImagePrecision = f32;
pub type InternalDataRepresentation = ArrayD<ImagePrecision>;

/// Returned by everything that builds or runs a model.
pub type ModelResult<T> = std::result::Result<T, ModelError>;
