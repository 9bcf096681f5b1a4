use crate::{
    activation_functions::Activation,
    layers::{assign_parameter, glorot_uniform, Layer, Phase, Shape},
    ImagePrecision, InternalDataRepresentation, ModelError, ModelResult, WeightPrecision,
};
use ndarray::*;
use rand::Rng;

/// Rust implementation of a convolutional layer with stride 1 and "same" padding,
/// so height and width are preserved.
/// The weight matrix shall have dimension (in that order)
/// kernel height x kernel width x input channels x output channels
/// (to comply with the order in which Keras weights are saved).
#[derive(Debug, Clone)]
pub struct ConvolutionLayer {
    /// Weight matrix of the kernel
    kernel: Array4<WeightPrecision>,
    bias: Array1<WeightPrecision>,
    activation: Activation,
}

impl ConvolutionLayer {
    pub fn new(
        kernel: Array4<WeightPrecision>,
        bias: Array1<WeightPrecision>,
        activation: Activation,
    ) -> ConvolutionLayer {
        debug_assert_eq!(kernel.len_of(Axis(3)), bias.len(), "One bias per filter");
        ConvolutionLayer {
            kernel,
            bias,
            activation,
        }
    }

    /// Freshly initialized layer: Glorot uniform kernel, zero bias.
    pub fn init<R: Rng + ?Sized>(
        rng: &mut R,
        input_channels: usize,
        filters: usize,
        kernel_size: (usize, usize),
        activation: Activation,
    ) -> ConvolutionLayer {
        let (kernel_height, kernel_width) = kernel_size;
        let receptive_field = kernel_height * kernel_width;
        let kernel = glorot_uniform(
            rng,
            (kernel_height, kernel_width, input_channels, filters),
            receptive_field * input_channels,
            receptive_field * filters,
        );
        ConvolutionLayer::new(kernel, Array1::zeros(filters), activation)
    }

    pub fn filters(&self) -> usize {
        self.kernel.len_of(Axis(3))
    }

    fn input_channels(&self) -> usize {
        self.kernel.len_of(Axis(2))
    }

    /// Convolves a batch of (height, width, channels) images.
    /// Every image is unrolled im2col style, so the whole convolution becomes
    /// one matrix product per image. Read more here:
    /// <https://leonardoaraujosantos.gitbook.io/artificial-inteligence/machine_learning/deep_learning/convolution_layer/making_faster>
    pub fn convolve(
        &self,
        images: ArrayView4<ImagePrecision>,
    ) -> ModelResult<Array4<ImagePrecision>> {
        let (batch_size, height, width, _) = images.dim();
        let (kernel_height, kernel_width, channels, filters) = self.kernel.dim();

        let kernel_matrix = self
            .kernel
            .view()
            .into_shape((kernel_height * kernel_width * channels, filters))?;

        let mut output = Array4::zeros((batch_size, height, width, filters));
        for (image, mut out) in images.outer_iter().zip(output.outer_iter_mut()) {
            let columns = im2col(image, kernel_height, kernel_width);
            let mut activations = columns.dot(&kernel_matrix);
            activations += &self.bias;
            out.assign(&activations.into_shape((height, width, filters))?);
        }
        Ok(self.activation.activate(output))
    }
}

/// Unrolls every (kernel_height x kernel_width) patch of a zero padded image into
/// one row. Row i * width + j belongs to output pixel (i, j); within a row the
/// layout is (kernel row, kernel column, channel), matching the kernel layout.
fn im2col(
    image: ArrayView3<ImagePrecision>,
    kernel_height: usize,
    kernel_width: usize,
) -> Array2<ImagePrecision> {
    let (height, width, channels) = image.dim();
    let pad_top = (kernel_height - 1) / 2;
    let pad_left = (kernel_width - 1) / 2;

    let mut columns = Array2::zeros((height * width, kernel_height * kernel_width * channels));
    for i in 0..height {
        for j in 0..width {
            let mut row = columns.row_mut(i * width + j);
            for a in 0..kernel_height {
                let y = i + a;
                if y < pad_top || y - pad_top >= height {
                    continue;
                }
                for b in 0..kernel_width {
                    let x = j + b;
                    if x < pad_left || x - pad_left >= width {
                        continue;
                    }
                    let offset = (a * kernel_width + b) * channels;
                    row.slice_mut(s![offset..offset + channels])
                        .assign(&image.slice(s![y - pad_top, x - pad_left, ..]));
                }
            }
        }
    }
    columns
}

impl Layer for ConvolutionLayer {
    fn kind(&self) -> &'static str {
        "Conv2D"
    }

    fn output_shape(&self, input: &Shape) -> ModelResult<Shape> {
        match input.dims() {
            [height, width, channels] if *channels == self.input_channels() => {
                Ok(Shape::new([*height, *width, self.filters()]))
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
        let images = input.view().into_dimensionality::<Ix4>()?;
        Ok(self.convolve(images)?.into_dyn())
    }

    fn parameters(&self) -> Vec<(&'static str, ArrayViewD<'_, WeightPrecision>)> {
        vec![
            ("kernel", self.kernel.view().into_dyn()),
            ("bias", self.bias.view().into_dyn()),
        ]
    }

    fn set_parameter(&mut self, name: &str, value: ArrayD<WeightPrecision>) -> ModelResult<()> {
        match name {
            "kernel" => assign_parameter(&mut self.kernel, value, "Conv2D kernel"),
            "bias" => assign_parameter(&mut self.bias, value, "Conv2D bias"),
            _ => Err(crate::weight_loader::WeightError::WeightKeyError(name.to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Single channel 3x3 kernel stored in (height, width, 1, 1) layout
    fn single_kernel(weights: Vec<f32>) -> Array4<f32> {
        Array::from_shape_vec((3, 3, 1, 1), weights).unwrap()
    }

    #[test]
    fn test_im2col_pads_with_zeros() {
        let image = Array::from_shape_vec((2, 2, 1), vec![1., 2., 3., 4.]).unwrap();
        let columns = im2col(image.view(), 3, 3);

        assert_eq!(columns.dim(), (4, 9));
        // Patch around the top left pixel
        assert_eq!(
            columns.row(0),
            array![0., 0., 0., 0., 1., 2., 0., 3., 4.]
        );
        // Patch around the bottom right pixel
        assert_eq!(
            columns.row(3),
            array![1., 2., 0., 3., 4., 0., 0., 0., 0.]
        );
    }

    #[test]
    fn test_identity_kernel_preserves_image() {
        let kernel = single_kernel(vec![0., 0., 0., 0., 1., 0., 0., 0., 0.]);
        let layer = ConvolutionLayer::new(kernel, array![0.], Activation::Linear);
        let images = Array::from_shape_vec((1, 3, 3, 1), (1..10).map(|x| x as f32).collect())
            .unwrap();

        assert_eq!(layer.convolve(images.view()).unwrap(), images);
    }

    #[test]
    fn test_same_convolution_with_bias() {
        let kernel = single_kernel(vec![1.; 9]);
        let layer = ConvolutionLayer::new(kernel, array![1.], Activation::Linear);
        let images = Array::from_shape_vec((1, 3, 3, 1), vec![1.; 9]).unwrap();

        let output = layer.convolve(images.view()).unwrap();
        let expected = Array::from_shape_vec(
            (1, 3, 3, 1),
            vec![5., 7., 5., 7., 10., 7., 5., 7., 5.],
        )
        .unwrap();
        assert_eq!(output, expected);
    }

    #[test]
    fn test_multiple_channels_and_filters() {
        // Filter 0 sums both input channels at the center, filter 1 takes channel 1 only
        let mut kernel = Array4::zeros((3, 3, 2, 2));
        kernel[[1, 1, 0, 0]] = 1.;
        kernel[[1, 1, 1, 0]] = 1.;
        kernel[[1, 1, 1, 1]] = 1.;
        let layer = ConvolutionLayer::new(kernel, Array1::zeros(2), Activation::Relu);

        let mut images = Array4::zeros((2, 2, 2, 2));
        images[[0, 0, 0, 0]] = 2.;
        images[[0, 0, 0, 1]] = 3.;
        images[[1, 1, 1, 1]] = -4.;

        let output = layer.convolve(images.view()).unwrap();
        assert_eq!(output.dim(), (2, 2, 2, 2));
        assert_eq!(output[[0, 0, 0, 0]], 5.);
        assert_eq!(output[[0, 0, 0, 1]], 3.);
        // relu clips the negative response
        assert_eq!(output[[1, 1, 1, 1]], 0.);
    }

    #[test]
    fn test_output_shape() {
        let mut rng = rand::thread_rng();
        let layer = ConvolutionLayer::init(&mut rng, 1, 8, (3, 3), Activation::Elu);
        assert_eq!(
            layer.output_shape(&Shape::new([128, 128, 1])).unwrap(),
            Shape::new([128, 128, 8])
        );
        assert!(layer.output_shape(&Shape::new([128, 128, 3])).is_err());
        assert!(layer.output_shape(&Shape::new([128, 128])).is_err());
        assert_eq!(layer.num_parameters(), 3 * 3 * 8 + 8);
    }
}
