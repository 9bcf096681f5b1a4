use ndarray::*;
use num::Integer;

use crate::{
    layers::{Layer, Phase, Shape},
    ImagePrecision, InternalDataRepresentation, ModelError, ModelResult,
};

/// Max pooling with stride equal to the pool size and "same" padding:
/// an (h, w) input becomes (ceil(h / ph), ceil(w / pw)). Windows hanging over
/// the border only take the pixels that exist.
#[derive(Debug, Clone)]
pub struct MaxPoolingLayer {
    pool_height: usize,
    pool_width: usize,
}

impl MaxPoolingLayer {
    pub fn new(pool_size: (usize, usize)) -> MaxPoolingLayer {
        let (pool_height, pool_width) = pool_size;
        debug_assert!(pool_height > 0 && pool_width > 0, "Empty pooling window");
        MaxPoolingLayer {
            pool_height,
            pool_width,
        }
    }

    fn pooled_size(&self, height: usize, width: usize) -> (usize, usize) {
        (
            Integer::div_ceil(&height, &self.pool_height),
            Integer::div_ceil(&width, &self.pool_width),
        )
    }

    pub fn pool(&self, images: ArrayView4<ImagePrecision>) -> Array4<ImagePrecision> {
        let (batch_size, height, width, channels) = images.dim();
        let (new_height, new_width) = self.pooled_size(height, width);
        // Padding is split like tensorflow does, the larger half goes to the end
        let pad_top = (new_height * self.pool_height - height) / 2;
        let pad_left = (new_width * self.pool_width - width) / 2;

        let mut output = Array4::zeros((batch_size, new_height, new_width, channels));
        for i in 0..new_height {
            let top = (i * self.pool_height).saturating_sub(pad_top);
            let bottom = ((i + 1) * self.pool_height - pad_top).min(height);
            for j in 0..new_width {
                let left = (j * self.pool_width).saturating_sub(pad_left);
                let right = ((j + 1) * self.pool_width - pad_left).min(width);

                let window = images.slice(s![.., top..bottom, left..right, ..]);
                let maxima = window
                    .fold_axis(Axis(1), ImagePrecision::NEG_INFINITY, |&m, &v| m.max(v))
                    .fold_axis(Axis(1), ImagePrecision::NEG_INFINITY, |&m, &v| m.max(v));
                output.slice_mut(s![.., i, j, ..]).assign(&maxima);
            }
        }
        output
    }
}

impl Layer for MaxPoolingLayer {
    fn kind(&self) -> &'static str {
        "MaxPooling2D"
    }

    fn output_shape(&self, input: &Shape) -> ModelResult<Shape> {
        match input.dims() {
            [height, width, channels] => {
                let (new_height, new_width) = self.pooled_size(*height, *width);
                Ok(Shape::new([new_height, new_width, *channels]))
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
        Ok(self.pool(images).into_dyn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_pooling() {
        let images = Array::from_shape_vec(
            (1, 4, 4, 1),
            vec![
                1., 2., 5., 6., //
                3., 4., 7., 8., //
                -1., -2., 0., 0., //
                -3., -4., 0., 9.,
            ],
        )
        .unwrap();
        let layer = MaxPoolingLayer::new((2, 2));

        let output = layer.pool(images.view());
        let expected = Array::from_shape_vec((1, 2, 2, 1), vec![4., 8., -1., 9.]).unwrap();
        assert_eq!(output, expected);
    }

    #[test]
    fn test_pooling_odd_size_rounds_up() {
        let images = Array::from_shape_vec((1, 3, 3, 1), (1..10).map(|x| x as f32).collect())
            .unwrap();
        let layer = MaxPoolingLayer::new((2, 2));

        assert_eq!(
            layer.output_shape(&Shape::new([3, 3, 1])).unwrap(),
            Shape::new([2, 2, 1])
        );
        let output = layer.pool(images.view());
        let expected = Array::from_shape_vec((1, 2, 2, 1), vec![5., 6., 8., 9.]).unwrap();
        assert_eq!(output, expected);
    }

    #[test]
    fn test_pooling_keeps_channels_apart() {
        let mut images = Array4::zeros((2, 2, 2, 3));
        images[[0, 1, 1, 2]] = 7.;
        images[[1, 0, 1, 0]] = 3.;
        let output = MaxPoolingLayer::new((2, 2)).pool(images.view());

        assert_eq!(output.dim(), (2, 1, 1, 3));
        assert_eq!(output.slice(s![0, 0, 0, ..]), array![0., 0., 7.]);
        assert_eq!(output.slice(s![1, 0, 0, ..]), array![3., 0., 0.]);
    }

    #[test]
    fn test_three_halvings_of_128() {
        let layer = MaxPoolingLayer::new((2, 2));
        let shape = (0..3).fold(Shape::new([128, 128, 1]), |shape, _| {
            layer.output_shape(&shape).unwrap()
        });
        assert_eq!(shape, Shape::new([16, 16, 1]));
    }
}
