use std::path::PathBuf;

use image::ImageError;
use ndarray::ShapeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeederError {
    #[error("Batch index {index} out of range for an epoch of {len} batches")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Could not decode {} as an image: {source}", .path.display())]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
    #[error("Image {} is {found:?} pixels (height, width), expected {expected:?}", .path.display())]
    InconsistentImageSize {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("Could not list image directory {}: {source}", .path.display())]
    DirectoryRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid feeder configuration: {0}")]
    InvalidConfig(String),
    #[error("Images could not be stacked into a batch:\n {0}.")]
    Layout(#[from] ShapeError),
}
