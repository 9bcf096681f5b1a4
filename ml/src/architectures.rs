//! Catalog of the convolutional autoencoders for 128x128 grayscale images.
//!
//! Every architecture is an encoder made of convolution / pooling blocks
//! followed by a dense bottleneck, and a decoder that mirrors it with transposed
//! convolutions. The decoder is sized from the [`Bottleneck`] the encoder
//! construction reports, so both halves always agree on the shapes.
use std::{fmt, str::FromStr};

use log::info;
use rand::Rng;

use crate::{
    activation_functions::Activation,
    convolutions::ConvolutionLayer,
    fully_connected::FeedforwardLayer,
    layers::{DropoutLayer, FlattenLayer, ReshapeLayer, Shape},
    models::Sequential,
    pooling::MaxPoolingLayer,
    session::Session,
    transposed_convolutions::TransposedConvolutionLayer,
    ModelError, ModelResult,
};

pub const AE_128_TO_1024: &str = "AE_128_to_1024";
pub const AE_128_TO_256: &str = "AE_128_to_256";
pub const AE_128_TO_64: &str = "AE_128_to_64";

/// Height and width of the images all architectures work on.
pub const IMAGE_SHAPE: (usize, usize) = (128, 128);

const KERNEL_SIZE: (usize, usize) = (3, 3);
const POOL_SIZE: (usize, usize) = (2, 2);
const UPSAMPLING_STRIDE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    /// Four elu conv blocks, dropout in front of a 1024 wide code
    To1024,
    /// Four relu conv blocks with dropout after every block, 256 wide code
    To256,
    /// Three narrow elu conv blocks, 64 wide code
    To64,
}

impl Architecture {
    pub const ALL: [Architecture; 3] = [
        Architecture::To1024,
        Architecture::To256,
        Architecture::To64,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Architecture::To1024 => AE_128_TO_1024,
            Architecture::To256 => AE_128_TO_256,
            Architecture::To64 => AE_128_TO_64,
        }
    }

    /// Width of the latent code.
    pub fn code_size(&self) -> usize {
        match self {
            Architecture::To1024 => 1024,
            Architecture::To256 => 256,
            Architecture::To64 => 64,
        }
    }

    /// Builds a freshly initialized (encoder, decoder) pair for images of the given size.
    pub fn build<R: Rng + ?Sized>(
        &self,
        image_shape: (usize, usize),
        rng: &mut R,
    ) -> ModelResult<(Sequential, Sequential)> {
        let (encoder, decoder) = match self {
            Architecture::To1024 => build_to_1024(image_shape, rng)?,
            Architecture::To256 => build_to_256(image_shape, rng)?,
            Architecture::To64 => build_to_64(image_shape, rng)?,
        };
        info!(
            "Built {} with {} encoder and {} decoder parameters",
            self,
            encoder.num_parameters(),
            decoder.num_parameters()
        );
        Ok((encoder, decoder))
    }
}

impl FromStr for Architecture {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Architecture::ALL
            .iter()
            .copied()
            .find(|a| a.name() == s)
            .ok_or_else(|| ModelError::UnknownArchitecture(s.to_string()))
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Builds the named architecture for 128x128 images with freshly drawn parameters.
pub fn build(model_name: &str) -> ModelResult<(Sequential, Sequential)> {
    let architecture: Architecture = model_name.parse()?;
    Session::new(None).build(architecture)
}

/// Shapes of the encoder at the bottleneck, everything the decoder needs to
/// mirror it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bottleneck {
    /// Feature map entering the flatten stage
    pub feature_shape: Shape,
    /// Number of scalars in that feature map
    pub flatten_size: usize,
    pub code_size: usize,
}

impl Bottleneck {
    fn new(feature_shape: Shape, code_size: usize) -> Bottleneck {
        Bottleneck {
            flatten_size: feature_shape.size(),
            feature_shape,
            code_size,
        }
    }
}

/// Channels of the model's current output. Only called on image shaped outputs.
fn current_channels(model: &Sequential) -> ModelResult<usize> {
    model
        .output_shape()
        .channels()
        .ok_or_else(|| ModelError::InvalidInput {
            layer: "Conv2D",
            shape: model.output_shape().clone(),
        })
}

/// Conv2D (3x3, same) followed by 2x2 max pooling and an optional dropout.
fn add_conv_block<R: Rng + ?Sized>(
    encoder: &mut Sequential,
    filters: usize,
    activation: Activation,
    dropout: Option<f32>,
    rng: &mut R,
) -> ModelResult<()> {
    let channels = current_channels(encoder)?;
    encoder.add(ConvolutionLayer::init(
        rng,
        channels,
        filters,
        KERNEL_SIZE,
        activation,
    ))?;
    encoder.add(MaxPoolingLayer::new(POOL_SIZE))?;
    if let Some(rate) = dropout {
        encoder.add(DropoutLayer::new(rate)?)?;
    }
    Ok(())
}

/// Transposed convolution (3x3, stride 2, same) and an optional dropout.
fn add_upsampling_block<R: Rng + ?Sized>(
    decoder: &mut Sequential,
    filters: usize,
    activation: Activation,
    dropout: Option<f32>,
    rng: &mut R,
) -> ModelResult<()> {
    let channels = current_channels(decoder)?;
    decoder.add(TransposedConvolutionLayer::init(
        rng,
        channels,
        filters,
        KERNEL_SIZE,
        UPSAMPLING_STRIDE,
        activation,
    ))?;
    if let Some(rate) = dropout {
        decoder.add(DropoutLayer::new(rate)?)?;
    }
    Ok(())
}

/// Input stage shared by all encoders: (H, W) images get a channel axis.
fn new_encoder(image_shape: (usize, usize)) -> ModelResult<Sequential> {
    let (height, width) = image_shape;
    let mut encoder = Sequential::new("encoder", Shape::new([height, width]));
    encoder.add(ReshapeLayer::new(Shape::new([height, width, 1])))?;
    Ok(encoder)
}

/// Dense layer widening the code back to the flattened feature map, reshaped
/// to the feature map the encoder flattened.
fn add_unflatten<R: Rng + ?Sized>(
    decoder: &mut Sequential,
    bottleneck: &Bottleneck,
    activation: Activation,
    rng: &mut R,
) -> ModelResult<()> {
    decoder.add(FeedforwardLayer::init(
        rng,
        bottleneck.code_size,
        bottleneck.flatten_size,
        activation,
    ))?;
    decoder.add(ReshapeLayer::new(bottleneck.feature_shape.clone()))?;
    Ok(())
}

/// Single channel sigmoid output, with the channel axis dropped again.
fn add_reconstruction<R: Rng + ?Sized>(decoder: &mut Sequential, rng: &mut R) -> ModelResult<()> {
    add_upsampling_block(decoder, 1, Activation::Sigmoid, None, rng)?;
    let output_image_shape = Shape::from(&decoder.output_shape().dims()[..2]);
    decoder.add(ReshapeLayer::new(output_image_shape))?;
    Ok(())
}

fn build_to_64<R: Rng + ?Sized>(
    image_shape: (usize, usize),
    rng: &mut R,
) -> ModelResult<(Sequential, Sequential)> {
    let code_size = Architecture::To64.code_size();

    let mut encoder = new_encoder(image_shape)?;
    for &filters in &[8, 16, 32] {
        add_conv_block(&mut encoder, filters, Activation::Elu, None, rng)?;
    }
    let bottleneck = Bottleneck::new(encoder.output_shape().clone(), code_size);
    encoder.add(FlattenLayer::new())?;
    encoder.add(FeedforwardLayer::init(
        rng,
        bottleneck.flatten_size,
        code_size,
        Activation::Elu,
    ))?;

    let mut decoder = Sequential::new("decoder", Shape::new([code_size]));
    add_unflatten(&mut decoder, &bottleneck, Activation::Elu, rng)?;
    for &filters in &[16, 8] {
        add_upsampling_block(&mut decoder, filters, Activation::Elu, None, rng)?;
    }
    add_reconstruction(&mut decoder, rng)?;

    Ok((encoder, decoder))
}

fn build_to_256<R: Rng + ?Sized>(
    image_shape: (usize, usize),
    rng: &mut R,
) -> ModelResult<(Sequential, Sequential)> {
    let code_size = Architecture::To256.code_size();

    let mut encoder = new_encoder(image_shape)?;
    for &(filters, rate) in &[(16, 0.2), (32, 0.2), (64, 0.2), (128, 0.5)] {
        add_conv_block(&mut encoder, filters, Activation::Relu, Some(rate), rng)?;
    }
    let bottleneck = Bottleneck::new(encoder.output_shape().clone(), code_size);
    encoder.add(FlattenLayer::new())?;
    encoder.add(FeedforwardLayer::init(
        rng,
        bottleneck.flatten_size,
        code_size,
        Activation::Relu,
    ))?;

    let mut decoder = Sequential::new("decoder", Shape::new([code_size]));
    add_unflatten(&mut decoder, &bottleneck, Activation::Relu, rng)?;
    decoder.add(DropoutLayer::new(0.5)?)?;
    for &filters in &[64, 32, 16] {
        add_upsampling_block(&mut decoder, filters, Activation::Relu, Some(0.2), rng)?;
    }
    add_reconstruction(&mut decoder, rng)?;

    Ok((encoder, decoder))
}

fn build_to_1024<R: Rng + ?Sized>(
    image_shape: (usize, usize),
    rng: &mut R,
) -> ModelResult<(Sequential, Sequential)> {
    let code_size = Architecture::To1024.code_size();

    let mut encoder = new_encoder(image_shape)?;
    for &filters in &[16, 32, 64, 128] {
        add_conv_block(&mut encoder, filters, Activation::Elu, None, rng)?;
    }
    let bottleneck = Bottleneck::new(encoder.output_shape().clone(), code_size);
    encoder.add(FlattenLayer::new())?;
    encoder.add(DropoutLayer::new(0.5)?)?;
    encoder.add(FeedforwardLayer::init(
        rng,
        bottleneck.flatten_size,
        code_size,
        Activation::Elu,
    ))?;

    let mut decoder = Sequential::new("decoder", Shape::new([code_size]));
    decoder.add(DropoutLayer::new(0.5)?)?;
    add_unflatten(&mut decoder, &bottleneck, Activation::Elu, rng)?;
    for &filters in &[64, 32, 16] {
        add_upsampling_block(&mut decoder, filters, Activation::Elu, None, rng)?;
    }
    add_reconstruction(&mut decoder, rng)?;

    Ok((encoder, decoder))
}
