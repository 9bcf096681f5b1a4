use crate::WeightPrecision;
use ndarray::{Array, ArrayD, IxDyn, ShapeError};
use ndarray_npy::{NpzReader, ReadNpzError, WriteNpzError};
use serde_json::{self, Map, Value};
use std::io::{Read, Seek};
use std::{fs, path::Path};
use thiserror::Error;

pub type WeightResult<T> = Result<T, WeightError>;

/// Everything that can go wrong reading or writing a checkpoint.
#[derive(Error, Debug)]
pub enum WeightError {
    #[error("Checkpoint has no parameter {0}")]
    WeightKeyError(String),
    #[error("Checkpoint didn't have the correct format (required: JSON object mapping parameter keys to flattened arrays)")]
    WeightFormatError,
    #[error("Checkpoint could not be opened:\n {0}.")]
    WeightFileNotFoundError(#[from] std::io::Error),
    #[error("Checkpoint is not a readable npz archive:\n {0}.")]
    WeightFileNpzError(#[from] ReadNpzError),
    #[error("Checkpoint could not be written:\n {0}.")]
    WeightFileNpzWriteError(#[from] WriteNpzError),
    #[error("Flattened parameter does not fit the requested shape:\n {0}.")]
    WeightShapeError(#[from] ShapeError),
    #[error("Parameter {name} has shape {found:?} in the checkpoint, the model expects {expected:?}")]
    WeightShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

/// Source of named parameter arrays, e.g. a checkpoint of a trained model.
///
/// Keys follow `<model>/<index>_<layer kind>/<parameter>`, see
/// [`crate::models::parameter_key`]. The shape is the one the model expects,
/// a loader fails rather than hand out anything else.
pub trait WeightLoader {
    fn get_weight(
        &mut self,
        param_name: &str,
        shape: &[usize],
    ) -> WeightResult<ArrayD<WeightPrecision>>;
}

/// Checkpoint as one JSON object of flattened arrays, read into memory at once.
pub struct JsonWeightLoader {
    content: Map<String, Value>,
}

impl JsonWeightLoader {
    pub fn new<P: AsRef<Path>>(path: P) -> WeightResult<JsonWeightLoader> {
        let raw_file = fs::read_to_string(path)?;
        let parsed: Value =
            serde_json::from_str(&raw_file).map_err(|_| WeightError::WeightFormatError)?;
        match parsed {
            Value::Object(content) => Ok(JsonWeightLoader { content }),
            _ => Err(WeightError::WeightFormatError),
        }
    }
}

impl WeightLoader for JsonWeightLoader {
    /// Parameters are stored flattened in row-major order and brought into
    /// `shape` here.
    fn get_weight(
        &mut self,
        param_name: &str,
        shape: &[usize],
    ) -> WeightResult<ArrayD<WeightPrecision>> {
        let raw_arr = self
            .content
            .get(param_name)
            .ok_or_else(|| WeightError::WeightKeyError(param_name.to_string()))?;

        let raw_value_vector = match raw_arr {
            Value::Array(v) => v,
            _ => return Err(WeightError::WeightFormatError),
        };

        let weight_vector: Result<Vec<_>, _> = raw_value_vector
            .iter()
            .map(|j| {
                j.as_f64()
                    .map(|v| v as WeightPrecision)
                    .ok_or(WeightError::WeightFormatError)
            })
            .collect();

        let weights = Array::from_shape_vec(IxDyn(shape), weight_vector?)?;

        Ok(weights)
    }
}

/// Checkpoint as npz archive with one array per parameter, the format
/// [`crate::Autoencoder::save_weights`] writes.
pub struct NpzWeightLoader<R>
where
    R: Seek + Read,
{
    handle: R,
}

impl NpzWeightLoader<std::fs::File> {
    pub fn from_path<P: AsRef<Path>>(path: P) -> WeightResult<NpzWeightLoader<std::fs::File>> {
        let handle = std::fs::File::open(path)?;
        Ok(NpzWeightLoader { handle })
    }
}

impl<R> WeightLoader for NpzWeightLoader<R>
where
    R: Seek + Read,
{
    fn get_weight(
        &mut self,
        param_name: &str,
        shape: &[usize],
    ) -> WeightResult<ArrayD<WeightPrecision>> {
        // NpzReader borrows the handle mutably, so it is recreated per lookup
        let mut reader = NpzReader::new(&mut self.handle)?;

        let arr: ArrayD<WeightPrecision> = reader.by_name(param_name)?;

        if arr.shape() != shape {
            return Err(WeightError::WeightShapeMismatch {
                name: param_name.to_string(),
                expected: shape.to_vec(),
                found: arr.shape().to_vec(),
            });
        }
        Ok(arr)
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write;

    use super::*;
    use ndarray::{array, Array1, Array2};
    use tempfile::tempdir;

    #[test]
    fn test_json_weight_loader() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("temp-weights.txt");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            // Rust escapes curly braces by doubling them
            "{{ \"arr1\": [0.0, 1e-3, 1.0], \"arr2\": [0.0, 1.0, 2.0, 3.0]}}"
        )
        .unwrap();

        let mut loader = JsonWeightLoader::new(file_path).unwrap();

        assert_eq!(
            loader.get_weight("arr1", &[3]).unwrap(),
            array![0.0, 1e-3, 1.0].into_dyn()
        );
        assert_eq!(
            loader.get_weight("arr2", &[2, 2]).unwrap(),
            array![[0.0, 1.0], [2.0, 3.0]].into_dyn()
        );
        assert!(matches!(
            loader.get_weight("arr3", &[1]),
            Err(WeightError::WeightKeyError(_))
        ));
        assert!(matches!(
            loader.get_weight("arr1", &[2, 2]),
            Err(WeightError::WeightShapeError(_))
        ));

        drop(file);
        dir.close().unwrap();
    }

    #[test]
    fn test_json_weight_loader_rejects_non_objects() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("temp-weights.txt");
        fs::write(&file_path, "[1.0, 2.0]").unwrap();

        assert!(matches!(
            JsonWeightLoader::new(&file_path),
            Err(WeightError::WeightFormatError)
        ));
    }

    #[test]
    fn test_npz_weight_loader() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("temp-weights.npz");
        let file = File::create(&file_path).unwrap();
        let mut npz = ndarray_npy::NpzWriter::new(file);
        let a: Array2<f32> = array![[1., 2., 3.], [4., 5., 6.]];
        let b: Array1<f32> = array![7., 8., 9.];
        npz.add_array("a", &a).unwrap();
        npz.add_array("b", &b).unwrap();
        npz.finish().unwrap();

        let mut loader = NpzWeightLoader::from_path(file_path).unwrap();

        assert_eq!(loader.get_weight("a", &[2, 3]).unwrap(), a.into_dyn());
        assert_eq!(loader.get_weight("b", &[3]).unwrap(), b.into_dyn());
        assert!(matches!(
            loader.get_weight("b", &[4]),
            Err(WeightError::WeightShapeMismatch { .. })
        ));

        dir.close().unwrap();
    }
}
