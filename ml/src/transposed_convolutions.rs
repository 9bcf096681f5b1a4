//! Transposed convolutions (also wrongly called deconvolution layers)
//! are learnable upsampling maps.
//! More can be read here:
//! - https://datascience.stackexchange.com/questions/6107/what-are-deconvolutional-layers
//! - https://github.com/akutzer/numpy_cnn/blob/master/CNN/Layer/TransposedConv.py
//! - https://ieee.nitk.ac.in/blog/deconv/
use crate::{
    activation_functions::Activation,
    layers::{assign_parameter, glorot_uniform, Layer, Phase, Shape},
    weight_loader::WeightError,
    ImagePrecision, InternalDataRepresentation, ModelError, ModelResult, WeightPrecision,
};
use ndarray::*;
use rand::Rng;

/// Analog to a Convolution Layer, with "same" padding: every input pixel is
/// spread over a kernel sized patch of the output, and the output is
/// `stride` times larger than the input along height and width.
///
/// The kernel has dimension
/// kernel height x kernel width x input channels x output channels.
#[derive(Debug, Clone)]
pub struct TransposedConvolutionLayer {
    kernel: Array4<WeightPrecision>,
    bias: Array1<WeightPrecision>,
    stride: usize,
    activation: Activation,
}

impl TransposedConvolutionLayer {
    pub fn new(
        kernel: Array4<WeightPrecision>,
        bias: Array1<WeightPrecision>,
        stride: usize,
        activation: Activation,
    ) -> TransposedConvolutionLayer {
        debug_assert!(stride > 0, "Stride of 0 passed");
        debug_assert_eq!(kernel.len_of(Axis(3)), bias.len(), "One bias per filter");
        TransposedConvolutionLayer {
            kernel,
            bias,
            stride,
            activation,
        }
    }

    pub fn init<R: Rng + ?Sized>(
        rng: &mut R,
        input_channels: usize,
        filters: usize,
        kernel_size: (usize, usize),
        stride: usize,
        activation: Activation,
    ) -> TransposedConvolutionLayer {
        let (kernel_height, kernel_width) = kernel_size;
        let receptive_field = kernel_height * kernel_width;
        let kernel = glorot_uniform(
            rng,
            (kernel_height, kernel_width, input_channels, filters),
            receptive_field * input_channels,
            receptive_field * filters,
        );
        TransposedConvolutionLayer::new(kernel, Array1::zeros(filters), stride, activation)
    }

    pub fn filters(&self) -> usize {
        self.kernel.len_of(Axis(3))
    }

    fn input_channels(&self) -> usize {
        self.kernel.len_of(Axis(2))
    }

    /// Performs a transposed convolution on a batch of (height, width, channels)
    /// images. This upsamples the images.
    ///
    /// The full transposed output has size (H - 1) * stride + HH; "same" padding
    /// crops it to H * stride, cutting the smaller half of the excess at the
    /// start as tensorflow does.
    pub fn transposed_convolve(
        &self,
        images: ArrayView4<ImagePrecision>,
    ) -> ModelResult<Array4<ImagePrecision>> {
        let (batch_size, height, width, _) = images.dim();
        let (kernel_height, kernel_width, channels, filters) = self.kernel.dim();

        let new_height = height * self.stride;
        let new_width = width * self.stride;
        let full_height = height.saturating_sub(1) * self.stride + kernel_height;
        let full_width = width.saturating_sub(1) * self.stride + kernel_width;
        let pad_top = full_height.saturating_sub(new_height) / 2;
        let pad_left = full_width.saturating_sub(new_width) / 2;

        // weights.reshape(C, HH*WW*F), so that one row holds everything an
        // input channel contributes to its output patch
        let filter_rows = self
            .kernel
            .view()
            .permuted_axes([2, 0, 1, 3])
            .as_standard_layout()
            .into_owned()
            .into_shape((channels, kernel_height * kernel_width * filters))?;

        let mut output = Array4::zeros((batch_size, new_height, new_width, filters));
        for (image, mut out) in images.outer_iter().zip(output.outer_iter_mut()) {
            let image_rows = image
                .as_standard_layout()
                .into_owned()
                .into_shape((height * width, channels))?;
            let patches = image_rows.dot(&filter_rows);

            // col2im: scatter every patch into the output
            for i in 0..height {
                for j in 0..width {
                    let patch = patches.row(i * width + j);
                    for a in 0..kernel_height {
                        let y = i * self.stride + a;
                        if y < pad_top || y - pad_top >= new_height {
                            continue;
                        }
                        for b in 0..kernel_width {
                            let x = j * self.stride + b;
                            if x < pad_left || x - pad_left >= new_width {
                                continue;
                            }
                            let offset = (a * kernel_width + b) * filters;
                            let mut target = out.slice_mut(s![y - pad_top, x - pad_left, ..]);
                            target += &patch.slice(s![offset..offset + filters]);
                        }
                    }
                }
            }
        }
        output += &self.bias;
        Ok(self.activation.activate(output))
    }
}

impl Layer for TransposedConvolutionLayer {
    fn kind(&self) -> &'static str {
        "Conv2DTranspose"
    }

    fn output_shape(&self, input: &Shape) -> ModelResult<Shape> {
        match input.dims() {
            [height, width, channels] if *channels == self.input_channels() => Ok(Shape::new([
                *height * self.stride,
                *width * self.stride,
                self.filters(),
            ])),
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
        let images = input.view().into_dimensionality::<Ix4>()?;
        Ok(self.transposed_convolve(images)?.into_dyn())
    }

    fn parameters(&self) -> Vec<(&'static str, ArrayViewD<'_, WeightPrecision>)> {
        vec![
            ("kernel", self.kernel.view().into_dyn()),
            ("bias", self.bias.view().into_dyn()),
        ]
    }

    fn set_parameter(&mut self, name: &str, value: ArrayD<WeightPrecision>) -> ModelResult<()> {
        match name {
            "kernel" => assign_parameter(&mut self.kernel, value, "Conv2DTranspose kernel"),
            "bias" => assign_parameter(&mut self.bias, value, "Conv2DTranspose bias"),
            _ => Err(WeightError::WeightKeyError(name.to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_2d_conv_transpose_stride_1() {
        // Full transposed output would be 3x3, "same" keeps the top left 2x2
        let images = Array::from_shape_vec((1, 2, 2, 1), vec![55., 52., 57., 50.]).unwrap();
        let kernel = Array::from_shape_vec((2, 2, 1, 1), vec![1., 2., 3., 4.]).unwrap();
        let layer = TransposedConvolutionLayer::new(kernel, array![0.], 1, Activation::Linear);

        let output = layer.transposed_convolve(images.view()).unwrap();
        let expected = Array::from_shape_vec((1, 2, 2, 1), vec![55., 162., 222., 540.]).unwrap();
        assert_eq!(output, expected);
    }

    #[test]
    fn test_2d_conv_transpose_stride_2() {
        let images = Array::from_shape_vec((1, 2, 2, 1), vec![1., 2., 3., 4.]).unwrap();
        let kernel = Array::from_shape_vec((3, 3, 1, 1), vec![1.; 9]).unwrap();
        let layer = TransposedConvolutionLayer::new(kernel, array![0.], 2, Activation::Linear);

        let output = layer.transposed_convolve(images.view()).unwrap();
        // Patches overlap on every second row and column
        let expected = Array::from_shape_vec(
            (1, 4, 4, 1),
            vec![
                1., 1., 3., 2., //
                1., 1., 3., 2., //
                4., 4., 10., 6., //
                3., 3., 7., 4.,
            ],
        )
        .unwrap();
        assert_eq!(output, expected);
    }

    #[test]
    fn test_channels_bias_and_activation() {
        // Two input channels feeding a single filter through a 1x1 kernel
        let kernel = Array::from_shape_vec((1, 1, 2, 1), vec![1., -1.]).unwrap();
        let layer = TransposedConvolutionLayer::new(kernel, array![0.5], 2, Activation::Relu);
        let images = Array::from_shape_vec((1, 1, 1, 2), vec![3., 1.]).unwrap();

        let output = layer.transposed_convolve(images.view()).unwrap();
        assert_eq!(output.dim(), (1, 2, 2, 1));
        // Only the top left pixel receives the input, the others get the bias only
        assert_eq!(
            output.into_shape(4).unwrap(),
            array![2.5, 0.5, 0.5, 0.5]
        );
    }

    #[test]
    fn test_output_shape_doubles() {
        let layer = TransposedConvolutionLayer::init(
            &mut rand::thread_rng(),
            32,
            16,
            (3, 3),
            2,
            Activation::Elu,
        );
        assert_eq!(
            layer.output_shape(&Shape::new([16, 16, 32])).unwrap(),
            Shape::new([32, 32, 16])
        );
        assert!(layer.output_shape(&Shape::new([16, 16, 8])).is_err());
    }
}
