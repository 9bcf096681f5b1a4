//! The layer abstraction shared by every stage of a [`Sequential`](crate::models::Sequential)
//! model, together with the parameter-free stages (reshape, flatten, dropout).
//!
//! Every layer reports its output shape from its input shape alone, so a model
//! knows the shape of each stage as soon as it is assembled. No forward pass is
//! needed to size the following stage.
use std::fmt;

use ndarray::{Array, ArrayD, ArrayViewD, Dimension, IxDyn, ShapeBuilder};
use rand::{distributions::Uniform, Rng};

use crate::{
    weight_loader::WeightError, InternalDataRepresentation, ModelError, ModelResult,
    WeightPrecision,
};

/// Shape of a single sample, that is without the leading batch axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Shape {
        Shape(dims.into())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Number of scalars in one sample.
    pub fn size(&self) -> usize {
        self.0.iter().product()
    }

    /// Channel count of an image shape (height, width, channels).
    pub fn channels(&self) -> Option<usize> {
        match self.0.as_slice() {
            [_, _, c] => Some(*c),
            _ => None,
        }
    }

    /// Full tensor shape for a batch of `batch_size` samples.
    pub fn batched(&self, batch_size: usize) -> IxDyn {
        let mut dims = Vec::with_capacity(self.rank() + 1);
        dims.push(batch_size);
        dims.extend_from_slice(&self.0);
        IxDyn(&dims)
    }

    /// Shape of the samples in a batched tensor.
    pub fn of_batch(tensor_shape: &[usize]) -> Shape {
        Shape(tensor_shape.iter().skip(1).copied().collect())
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Shape {
        Shape(dims.to_vec())
    }
}

/// Rendered like Keras does, with `None` standing in for the batch axis.
impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(None")?;
        for d in &self.0 {
            write!(f, ", {}", d)?;
        }
        write!(f, ")")
    }
}

/// Whether a forward pass belongs to training or inference.
/// Only regularization stages behave differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Training,
    Inference,
}

pub trait Layer: fmt::Debug {
    /// Layer type as shown in model summaries
    fn kind(&self) -> &'static str;

    /// Output shape of a sample of the given input shape.
    fn output_shape(&self, input: &Shape) -> ModelResult<Shape>;

    fn forward(
        &self,
        input: &InternalDataRepresentation,
        phase: Phase,
    ) -> ModelResult<InternalDataRepresentation>;

    /// Named trainable parameters, in a stable order.
    fn parameters(&self) -> Vec<(&'static str, ArrayViewD<'_, WeightPrecision>)> {
        Vec::new()
    }

    /// Replaces a named parameter. The value must have the parameter's shape.
    fn set_parameter(&mut self, name: &str, _value: ArrayD<WeightPrecision>) -> ModelResult<()> {
        Err(WeightError::WeightKeyError(name.to_string()).into())
    }

    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|(_, p)| p.len()).sum()
    }
}

/// Overwrites `target` with `value` if both have the same shape.
pub(crate) fn assign_parameter<D: Dimension>(
    target: &mut Array<WeightPrecision, D>,
    value: ArrayD<WeightPrecision>,
    context: &str,
) -> ModelResult<()> {
    if target.shape() != value.shape() {
        return Err(ModelError::ShapeMismatch {
            context: context.to_string(),
            expected: Shape::from(target.shape()),
            found: Shape::from(value.shape()),
        });
    }
    let value = value.as_standard_layout().into_owned();
    *target = value.into_dimensionality::<D>()?;
    Ok(())
}

/// Glorot (Xavier) uniform initialization, the Keras default for kernels.
pub(crate) fn glorot_uniform<R, Sh, D>(
    rng: &mut R,
    shape: Sh,
    fan_in: usize,
    fan_out: usize,
) -> Array<WeightPrecision, D>
where
    R: Rng + ?Sized,
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
{
    let limit = (6.0 / (fan_in + fan_out) as WeightPrecision).sqrt();
    let distribution = Uniform::new_inclusive(-limit, limit);
    Array::from_shape_fn(shape, |_| rng.sample(distribution))
}

/// Changes the sample shape while keeping the number of scalars per sample.
#[derive(Debug, Clone)]
pub struct ReshapeLayer {
    target: Shape,
}

impl ReshapeLayer {
    pub fn new(target: Shape) -> ReshapeLayer {
        ReshapeLayer { target }
    }
}

impl Layer for ReshapeLayer {
    fn kind(&self) -> &'static str {
        "Reshape"
    }

    fn output_shape(&self, input: &Shape) -> ModelResult<Shape> {
        if input.size() != self.target.size() {
            return Err(ModelError::ShapeMismatch {
                context: "Reshape".to_string(),
                expected: self.target.clone(),
                found: input.clone(),
            });
        }
        Ok(self.target.clone())
    }

    fn forward(
        &self,
        input: &InternalDataRepresentation,
        _phase: Phase,
    ) -> ModelResult<InternalDataRepresentation> {
        let batch_size = input.len_of(ndarray::Axis(0));
        self.output_shape(&Shape::of_batch(input.shape()))?;
        let contiguous = input.as_standard_layout().into_owned();
        Ok(contiguous.into_shape(self.target.batched(batch_size))?)
    }
}

/// Flattens every sample into a single feature axis.
#[derive(Debug, Clone, Default)]
pub struct FlattenLayer;

impl FlattenLayer {
    pub fn new() -> FlattenLayer {
        FlattenLayer
    }
}

impl Layer for FlattenLayer {
    fn kind(&self) -> &'static str {
        "Flatten"
    }

    fn output_shape(&self, input: &Shape) -> ModelResult<Shape> {
        Ok(Shape::new([input.size()]))
    }

    fn forward(
        &self,
        input: &InternalDataRepresentation,
        _phase: Phase,
    ) -> ModelResult<InternalDataRepresentation> {
        let batch_size = input.len_of(ndarray::Axis(0));
        let target = self.output_shape(&Shape::of_batch(input.shape()))?;
        let contiguous = input.as_standard_layout().into_owned();
        Ok(contiguous.into_shape(target.batched(batch_size))?)
    }
}

/// Inverted dropout. The identity during inference; during training every
/// activation is zeroed with probability `rate` and the survivors are scaled
/// by `1 / (1 - rate)`.
#[derive(Debug, Clone)]
pub struct DropoutLayer {
    rate: f32,
}

impl DropoutLayer {
    /// Fails unless `rate` lies in [0, 1).
    pub fn new(rate: f32) -> ModelResult<DropoutLayer> {
        if !(0.0..1.0).contains(&rate) {
            return Err(ModelError::InvalidLayer {
                layer: "Dropout",
                reason: format!("rate {} is outside of [0, 1)", rate),
            });
        }
        Ok(DropoutLayer { rate })
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }
}

impl Layer for DropoutLayer {
    fn kind(&self) -> &'static str {
        "Dropout"
    }

    fn output_shape(&self, input: &Shape) -> ModelResult<Shape> {
        Ok(input.clone())
    }

    fn forward(
        &self,
        input: &InternalDataRepresentation,
        phase: Phase,
    ) -> ModelResult<InternalDataRepresentation> {
        match phase {
            Phase::Inference => Ok(input.clone()),
            Phase::Training => {
                let mut rng = rand::thread_rng();
                let scale = 1.0 / (1.0 - self.rate);
                Ok(input.mapv(|x| {
                    if rng.gen::<f32>() < self.rate {
                        0.0
                    } else {
                        x * scale
                    }
                }))
            }
        }
    }
}
