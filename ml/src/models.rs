use std::{
    fmt,
    fs::File,
    io::{Seek, Write},
    path::Path,
};

use log::{debug, info};
use ndarray::*;
use ndarray_npy::NpzWriter;

use crate::{
    layers::{Layer, Phase, Shape},
    losses::{Loss, Optimizer},
    weight_loader::{WeightError, WeightLoader},
    ImagePrecision, InternalDataRepresentation, ModelError, ModelResult,
};

/// Ordered stack of layers. The output shape of every stage is computed when
/// the layer is added, so the model is shape checked before it ever sees data.
pub struct Sequential {
    name: String,
    input_shape: Shape,
    layers: Vec<Box<dyn Layer>>,
    output_shapes: Vec<Shape>,
}

impl Sequential {
    pub fn new(name: &str, input_shape: Shape) -> Sequential {
        Sequential {
            name: name.to_string(),
            input_shape,
            layers: Vec::new(),
            output_shapes: Vec::new(),
        }
    }

    /// Appends a layer and returns the model's new output shape.
    pub fn add<L: Layer + 'static>(&mut self, layer: L) -> ModelResult<&Shape> {
        let shape = layer.output_shape(self.output_shape())?;
        debug!(
            "{}: adding {} with output shape {}",
            self.name,
            layer.kind(),
            shape
        );
        self.layers.push(Box::new(layer));
        self.output_shapes.push(shape);
        Ok(self.output_shape())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    /// Shape after the last stage, the input shape for an empty model.
    pub fn output_shape(&self) -> &Shape {
        self.output_shapes.last().unwrap_or(&self.input_shape)
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    /// Output shape of every stage, in order.
    pub fn stage_shapes(&self) -> &[Shape] {
        &self.output_shapes
    }

    pub fn num_parameters(&self) -> usize {
        self.layers.iter().map(|l| l.num_parameters()).sum()
    }

    pub fn forward(
        &self,
        input: &InternalDataRepresentation,
        phase: Phase,
    ) -> ModelResult<InternalDataRepresentation> {
        let sample_shape = Shape::of_batch(input.shape());
        if input.ndim() == 0 || sample_shape != self.input_shape {
            return Err(ModelError::ShapeMismatch {
                context: format!("input of {}", self.name),
                expected: self.input_shape.clone(),
                found: sample_shape,
            });
        }

        let mut activations = input.clone();
        for layer in &self.layers {
            activations = layer.forward(&activations, phase)?;
        }
        Ok(activations)
    }

    /// Replaces all parameters with the ones found in the loader.
    pub fn load_weights<L: WeightLoader + ?Sized>(&mut self, loader: &mut L) -> ModelResult<()> {
        let model_name = self.name.clone();
        for (index, layer) in self.layers.iter_mut().enumerate() {
            let wanted: Vec<(&'static str, Vec<usize>)> = layer
                .parameters()
                .iter()
                .map(|(name, values)| (*name, values.shape().to_vec()))
                .collect();
            for (param, shape) in wanted {
                let key = parameter_key(&model_name, index, layer.kind(), param);
                let values = loader.get_weight(&key, &shape)?;
                layer.set_parameter(param, values)?;
            }
        }
        info!("Loaded {} parameters into {}", self.num_parameters(), self.name);
        Ok(())
    }

    /// Adds all parameters to an npz archive, under the keys `load_weights` reads.
    pub fn write_weights<W: Write + Seek>(&self, npz: &mut NpzWriter<W>) -> ModelResult<()> {
        for (index, layer) in self.layers.iter().enumerate() {
            for (param, values) in layer.parameters() {
                let key = parameter_key(&self.name, index, layer.kind(), param);
                npz.add_array(key, &values).map_err(WeightError::from)?;
            }
        }
        Ok(())
    }
}

/// Key of a parameter in a checkpoint, e.g. `encoder/9_dense/kernel`.
pub fn parameter_key(model: &str, index: usize, kind: &str, param: &str) -> String {
    format!("{}/{}_{}/{}", model, index, kind.to_lowercase(), param)
}

impl fmt::Debug for Sequential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequential")
            .field("name", &self.name)
            .field("input_shape", &self.input_shape)
            .field("output_shapes", &self.output_shapes)
            .finish()
    }
}

const SUMMARY_WIDTH: usize = 76;

/// Keras style summary of the model
impl fmt::Display for Sequential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "_".repeat(SUMMARY_WIDTH);
        writeln!(f, "Model: \"{}\"", self.name)?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "{:<40}{:<26}{:>10}", "Layer (type)", "Output Shape", "Param #")?;
        writeln!(f, "{}", "=".repeat(SUMMARY_WIDTH))?;
        writeln!(
            f,
            "{:<40}{:<26}{:>10}",
            "input (InputLayer)",
            self.input_shape.to_string(),
            0
        )?;
        for (index, (layer, shape)) in self.layers.iter().zip(&self.output_shapes).enumerate() {
            let label = format!("{}_{} ({})", layer.kind().to_lowercase(), index, layer.kind());
            writeln!(
                f,
                "{:<40}{:<26}{:>10}",
                label,
                shape.to_string(),
                layer.num_parameters()
            )?;
        }
        writeln!(f, "{}", "=".repeat(SUMMARY_WIDTH))?;
        writeln!(f, "Total params: {}", self.num_parameters())?;
        write!(f, "{}", rule)
    }
}

/// Encoder and decoder wired into one pipeline, with the loss and the
/// optimization rule it is trained with.
#[derive(Debug)]
pub struct Autoencoder {
    encoder: Sequential,
    decoder: Sequential,
    loss: Loss,
    optimizer: Optimizer,
}

/// Wires encoder and decoder into one image to image pipeline, binding binary
/// cross entropy and Adadelta to it.
///
/// The encoder's code must fit the decoder's input, and the decoder must
/// reproduce the encoder's input shape.
pub fn compile_autoencoder(encoder: Sequential, decoder: Sequential) -> ModelResult<Autoencoder> {
    if encoder.output_shape() != decoder.input_shape() {
        return Err(ModelError::ShapeMismatch {
            context: "code between encoder and decoder".to_string(),
            expected: decoder.input_shape().clone(),
            found: encoder.output_shape().clone(),
        });
    }
    if decoder.output_shape() != encoder.input_shape() {
        return Err(ModelError::ShapeMismatch {
            context: "reconstruction".to_string(),
            expected: encoder.input_shape().clone(),
            found: decoder.output_shape().clone(),
        });
    }

    let autoencoder = Autoencoder {
        encoder,
        decoder,
        loss: Loss::BinaryCrossentropy,
        optimizer: Optimizer::adadelta(),
    };
    info!(
        "Compiled autoencoder {} -> {} -> {} with {} parameters, loss {}, optimizer {}",
        autoencoder.encoder.input_shape(),
        autoencoder.encoder.output_shape(),
        autoencoder.decoder.output_shape(),
        autoencoder.num_parameters(),
        autoencoder.loss,
        autoencoder.optimizer
    );
    Ok(autoencoder)
}

impl Autoencoder {
    pub fn encoder(&self) -> &Sequential {
        &self.encoder
    }

    pub fn decoder(&self) -> &Sequential {
        &self.decoder
    }

    pub fn loss(&self) -> Loss {
        self.loss
    }

    pub fn optimizer(&self) -> Optimizer {
        self.optimizer
    }

    pub fn num_parameters(&self) -> usize {
        self.encoder.num_parameters() + self.decoder.num_parameters()
    }

    /// Latent codes of a batch of (height, width) images.
    pub fn encode(&self, images: &Array3<ImagePrecision>) -> ModelResult<Array2<ImagePrecision>> {
        let codes = self
            .encoder
            .forward(&images.clone().into_dyn(), Phase::Inference)?;
        Ok(codes.into_dimensionality::<Ix2>()?)
    }

    /// Images reconstructed from a batch of latent codes.
    pub fn decode(&self, codes: &Array2<ImagePrecision>) -> ModelResult<Array3<ImagePrecision>> {
        let images = self
            .decoder
            .forward(&codes.clone().into_dyn(), Phase::Inference)?;
        Ok(images.into_dimensionality::<Ix3>()?)
    }

    pub fn predict(&self, images: &Array3<ImagePrecision>) -> ModelResult<Array3<ImagePrecision>> {
        self.decode(&self.encode(images)?)
    }

    /// Loss of the reconstruction of `x` against the targets `y`.
    pub fn evaluate(
        &self,
        x: &Array3<ImagePrecision>,
        y: &Array3<ImagePrecision>,
    ) -> ModelResult<ImagePrecision> {
        let reconstruction = self.predict(x)?;
        self.loss.compute(y, &reconstruction)
    }

    pub fn load_weights<L: WeightLoader + ?Sized>(&mut self, loader: &mut L) -> ModelResult<()> {
        self.encoder.load_weights(loader)?;
        self.decoder.load_weights(loader)
    }

    /// Writes encoder and decoder parameters into one npz checkpoint.
    pub fn save_weights<P: AsRef<Path>>(&self, path: P) -> ModelResult<()> {
        let file = File::create(path.as_ref()).map_err(WeightError::from)?;
        let mut npz = NpzWriter::new(file);
        self.encoder.write_weights(&mut npz)?;
        self.decoder.write_weights(&mut npz)?;
        npz.finish().map_err(WeightError::from)?;
        info!("Saved checkpoint to {}", path.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        activation_functions::Activation,
        fully_connected::FeedforwardLayer,
        layers::{FlattenLayer, ReshapeLayer},
        weight_loader::NpzWeightLoader,
    };
    use tempfile::tempdir;

    /// 2x2 images squeezed into a code of 2 and back, with identity-like weights
    fn tiny_autoencoder() -> (Sequential, Sequential) {
        let mut encoder = Sequential::new("encoder", Shape::new([2, 2]));
        encoder.add(FlattenLayer::new()).unwrap();
        encoder
            .add(FeedforwardLayer::new(
                array![[1., 0.], [0., 0.], [0., 0.], [0., 1.]],
                array![0., 0.],
                Activation::Linear,
            ))
            .unwrap();

        let mut decoder = Sequential::new("decoder", Shape::new([2]));
        decoder
            .add(FeedforwardLayer::new(
                array![[1., 0., 0., 0.], [0., 0., 0., 1.]],
                array![0., 0., 0., 0.],
                Activation::Linear,
            ))
            .unwrap();
        decoder.add(ReshapeLayer::new(Shape::new([2, 2]))).unwrap();
        (encoder, decoder)
    }

    #[test]
    fn test_add_tracks_shapes() {
        let (encoder, decoder) = tiny_autoencoder();
        assert_eq!(
            encoder.stage_shapes(),
            &[Shape::new([4]), Shape::new([2])]
        );
        assert_eq!(decoder.output_shape(), &Shape::new([2, 2]));
        assert_eq!(encoder.num_parameters(), 10);
    }

    #[test]
    fn test_add_rejects_incompatible_layer() {
        let mut model = Sequential::new("model", Shape::new([4]));
        let result = model.add(ReshapeLayer::new(Shape::new([3, 3])));
        assert!(matches!(result, Err(ModelError::ShapeMismatch { .. })));
        assert!(model.layers().is_empty());
    }

    #[test]
    fn test_forward_rejects_wrong_input() {
        let (encoder, _) = tiny_autoencoder();
        let input = Array3::<f32>::zeros((1, 3, 3)).into_dyn();
        assert!(matches!(
            encoder.forward(&input, Phase::Inference),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_predict_keeps_diagonal() {
        let (encoder, decoder) = tiny_autoencoder();
        let autoencoder = compile_autoencoder(encoder, decoder).unwrap();
        let images = array![[[0.2, 0.4], [0.6, 0.8]]];

        let codes = autoencoder.encode(&images).unwrap();
        assert_eq!(codes, array![[0.2, 0.8]]);
        let reconstruction = autoencoder.predict(&images).unwrap();
        assert_eq!(reconstruction, array![[[0.2, 0.0], [0.0, 0.8]]]);
        assert_eq!(autoencoder.decode(&codes).unwrap(), reconstruction);
    }

    #[test]
    fn test_compile_binds_loss_and_optimizer() {
        let (encoder, decoder) = tiny_autoencoder();
        let autoencoder = compile_autoencoder(encoder, decoder).unwrap();
        assert_eq!(autoencoder.loss(), Loss::BinaryCrossentropy);
        assert_eq!(autoencoder.optimizer(), Optimizer::adadelta());

        let images = array![[[1., 0.], [0., 1.]]];
        let loss = autoencoder.evaluate(&images, &images).unwrap();
        assert!(loss < 1e-3);
    }

    #[test]
    fn test_compile_rejects_mismatched_pair() {
        let (encoder, _) = tiny_autoencoder();
        let decoder = Sequential::new("decoder", Shape::new([3]));
        assert!(matches!(
            compile_autoencoder(encoder, decoder),
            Err(ModelError::ShapeMismatch { .. })
        ));

        let (encoder, _) = tiny_autoencoder();
        let mut decoder = Sequential::new("decoder", Shape::new([2]));
        decoder.add(ReshapeLayer::new(Shape::new([2, 1]))).unwrap();
        assert!(matches!(
            compile_autoencoder(encoder, decoder),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_summary_lists_every_stage() {
        let (encoder, _) = tiny_autoencoder();
        let summary = encoder.to_string();
        assert!(summary.starts_with("Model: \"encoder\""));
        assert!(summary.contains("flatten_0 (Flatten)"));
        assert!(summary.contains("dense_1 (Dense)"));
        assert!(summary.contains("(None, 4)"));
        assert!(summary.contains("Total params: 10"));
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("checkpoint.npz");

        let (encoder, decoder) = tiny_autoencoder();
        let trained = compile_autoencoder(encoder, decoder).unwrap();
        trained.save_weights(&path).unwrap();

        let mut rng = rand::thread_rng();
        let mut encoder = Sequential::new("encoder", Shape::new([2, 2]));
        encoder.add(FlattenLayer::new()).unwrap();
        encoder
            .add(FeedforwardLayer::init(&mut rng, 4, 2, Activation::Linear))
            .unwrap();
        let mut decoder = Sequential::new("decoder", Shape::new([2]));
        decoder
            .add(FeedforwardLayer::init(&mut rng, 2, 4, Activation::Linear))
            .unwrap();
        decoder.add(ReshapeLayer::new(Shape::new([2, 2]))).unwrap();
        let mut restored = compile_autoencoder(encoder, decoder).unwrap();

        let mut loader = NpzWeightLoader::from_path(&path).unwrap();
        restored.load_weights(&mut loader).unwrap();

        let images = array![[[0.5, 0.1], [0.3, 0.9]]];
        assert_eq!(
            restored.predict(&images).unwrap(),
            trained.predict(&images).unwrap()
        );

        dir.close().unwrap();
    }

    #[test]
    fn test_parameter_key() {
        assert_eq!(
            parameter_key("decoder", 3, "Conv2DTranspose", "kernel"),
            "decoder/3_conv2dtranspose/kernel"
        );
    }
}
