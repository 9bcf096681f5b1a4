use crate::{
    activation_functions::Activation,
    layers::{assign_parameter, glorot_uniform, Layer, Phase, Shape},
    weight_loader::WeightError,
    ImagePrecision, InternalDataRepresentation, ModelError, ModelResult, WeightPrecision,
};
use ndarray::*;
use rand::Rng;

/// Rust implementation of a feed forward layer.
/// The weight matrix shall have dimension (in that order)
/// input units x output units (to comply with the order in which Keras weights are saved).
#[derive(Debug, Clone)]
pub struct FeedforwardLayer {
    weights: Array2<WeightPrecision>,
    bias: Array1<WeightPrecision>,
    activation: Activation,
}

impl FeedforwardLayer {
    pub fn new(
        weights: Array2<WeightPrecision>,
        bias: Array1<WeightPrecision>,
        activation: Activation,
    ) -> FeedforwardLayer {
        debug_assert_eq!(weights.len_of(Axis(1)), bias.len(), "One bias per unit");
        FeedforwardLayer {
            weights,
            bias,
            activation,
        }
    }

    pub fn init<R: Rng + ?Sized>(
        rng: &mut R,
        input_dimension: usize,
        output_dimension: usize,
        activation: Activation,
    ) -> FeedforwardLayer {
        let weights = glorot_uniform(
            rng,
            (input_dimension, output_dimension),
            input_dimension,
            output_dimension,
        );
        FeedforwardLayer::new(weights, Array1::zeros(output_dimension), activation)
    }

    pub fn input_dimension(&self) -> usize {
        self.weights.len_of(Axis(0))
    }

    pub fn output_dimension(&self) -> usize {
        self.weights.len_of(Axis(1))
    }

    pub fn forward_pass<'a, V>(&self, data: V) -> Array2<ImagePrecision>
    where
        V: AsArray<'a, ImagePrecision, Ix2>,
    {
        let data_arr: ArrayView2<ImagePrecision> = data.into();
        let mut activations = data_arr.dot(&self.weights);
        activations += &self.bias;
        self.activation.activate(activations)
    }
}

impl Layer for FeedforwardLayer {
    fn kind(&self) -> &'static str {
        "Dense"
    }

    fn output_shape(&self, input: &Shape) -> ModelResult<Shape> {
        match input.dims() {
            [units] if *units == self.input_dimension() => {
                Ok(Shape::new([self.output_dimension()]))
            }
            _ => Err(ModelError::InvalidInput {
                layer: self.kind(),
                shape: input.clone(),
            }),
        }
    }

    fn forward(
        &self,
        input: &InternalDataRepresentation,
        _phase: Phase,
    ) -> ModelResult<InternalDataRepresentation> {
        self.output_shape(&Shape::of_batch(input.shape()))?;
        let data = input.view().into_dimensionality::<Ix2>()?;
        Ok(self.forward_pass(data).into_dyn())
    }

    fn parameters(&self) -> Vec<(&'static str, ArrayViewD<'_, WeightPrecision>)> {
        vec![
            ("kernel", self.weights.view().into_dyn()),
            ("bias", self.bias.view().into_dyn()),
        ]
    }

    fn set_parameter(&mut self, name: &str, value: ArrayD<WeightPrecision>) -> ModelResult<()> {
        match name {
            "kernel" => assign_parameter(&mut self.weights, value, "Dense kernel"),
            "bias" => assign_parameter(&mut self.bias, value, "Dense bias"),
            _ => Err(WeightError::WeightKeyError(name.to_string()).into()),
        }
    }
}
