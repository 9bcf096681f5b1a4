use std::path::{Path, PathBuf};

use image::{imageops::FilterType, io::Reader as ImageReader, ImageError};
use log::debug;
use ndarray::{stack, Array2, Array3, ArrayView2, Axis};
use nshare::ToNdarray2;

use crate::{FeederError, FeederResult};

/// Decodes one file into a (height, width) grayscale array. Color images are
/// converted to luma. The format is guessed from the content, not the name.
pub(crate) fn load_grayscale(
    path: &Path,
    resize_to: Option<(u32, u32)>,
) -> FeederResult<Array2<u8>> {
    let decode_error = |source: ImageError| FeederError::ImageDecode {
        path: path.to_path_buf(),
        source,
    };

    let image = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| decode_error(ImageError::IoError(e)))?
        .decode()
        .map_err(decode_error)?;

    let image = match resize_to {
        Some((width, height)) => image.resize_exact(width, height, FilterType::Triangle),
        None => image,
    };
    Ok(image.to_luma8().into_ndarray2())
}

/// Decodes the named files of `img_dir` and stacks them into one
/// (images, height, width) array scaled to [0, 1].
/// Fails on the first file that can't be decoded.
pub(crate) fn to_data_matrix(
    img_dir: &Path,
    file_names: &[PathBuf],
    resize_to: Option<(u32, u32)>,
) -> FeederResult<Array3<f32>> {
    let images = file_names
        .iter()
        .map(|name| load_grayscale(&img_dir.join(name), resize_to))
        .collect::<FeederResult<Vec<_>>>()?;

    let expected = match images.first() {
        Some(first) => first.dim(),
        None => {
            let (width, height) = resize_to.unwrap_or((0, 0));
            return Ok(Array3::zeros((0, height as usize, width as usize)));
        }
    };
    for (image, name) in images.iter().zip(file_names) {
        if image.dim() != expected {
            return Err(FeederError::InconsistentImageSize {
                path: img_dir.join(name),
                expected,
                found: image.dim(),
            });
        }
    }

    let views: Vec<ArrayView2<u8>> = images.iter().map(|image| image.view()).collect();
    let data = stack(Axis(0), &views)?;
    debug!(
        "Decoded {} images of {}x{} from {}",
        images.len(),
        expected.0,
        expected.1,
        img_dir.display()
    );
    Ok(data.mapv(|pixel| pixel as f32 / 255.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbImage};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_grayscale_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wide.png");
        let mut image = GrayImage::new(3, 2);
        image.put_pixel(2, 1, Luma([200]));
        image.save(&path).unwrap();

        let array = load_grayscale(&path, None).unwrap();
        assert_eq!(array.dim(), (2, 3));
        assert_eq!(array[[1, 2]], 200);
        assert_eq!(array[[0, 0]], 0);
    }

    #[test]
    fn test_color_images_become_gray() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("white.png");
        RgbImage::from_pixel(2, 2, image::Rgb([255, 255, 255]))
            .save(&path)
            .unwrap();

        let array = load_grayscale(&path, None).unwrap();
        assert_eq!(array.dim(), (2, 2));
        // luma weights may round the last bit away
        assert!(array.iter().all(|&p| p >= 254));
    }

    #[test]
    fn test_format_is_guessed_from_content() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("image.png");
        GrayImage::from_pixel(2, 2, Luma([7])).save(&png).unwrap();
        let unnamed = dir.path().join("image.data");
        fs::rename(&png, &unnamed).unwrap();

        assert_eq!(load_grayscale(&unnamed, None).unwrap()[[1, 1]], 7);
    }

    #[test]
    fn test_resize() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("big.png");
        GrayImage::from_pixel(8, 6, Luma([90])).save(&path).unwrap();

        let array = load_grayscale(&path, Some((4, 2))).unwrap();
        assert_eq!(array.dim(), (2, 4));
        assert!(array.iter().all(|&p| (89..=90).contains(&p)));
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "not an image").unwrap();

        match load_grayscale(&path, None) {
            Err(FeederError::ImageDecode { path: failed, .. }) => assert_eq!(failed, path),
            other => panic!("expected a decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_to_data_matrix_normalizes() {
        let dir = tempdir().unwrap();
        GrayImage::from_pixel(2, 2, Luma([255]))
            .save(dir.path().join("a.png"))
            .unwrap();
        GrayImage::from_pixel(2, 2, Luma([51]))
            .save(dir.path().join("b.png"))
            .unwrap();

        let names = vec![PathBuf::from("a.png"), PathBuf::from("b.png")];
        let data = to_data_matrix(dir.path(), &names, None).unwrap();
        assert_eq!(data.dim(), (2, 2, 2));
        assert!(data.index_axis(Axis(0), 0).iter().all(|&p| p == 1.0));
        assert!(data
            .index_axis(Axis(0), 1)
            .iter()
            .all(|&p| (p - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_to_data_matrix_rejects_mixed_sizes() {
        let dir = tempdir().unwrap();
        GrayImage::new(2, 2).save(dir.path().join("a.png")).unwrap();
        GrayImage::new(3, 2).save(dir.path().join("b.png")).unwrap();
        let names = vec![PathBuf::from("a.png"), PathBuf::from("b.png")];

        assert!(matches!(
            to_data_matrix(dir.path(), &names, None),
            Err(FeederError::InconsistentImageSize {
                expected: (2, 2),
                found: (2, 3),
                ..
            })
        ));
        assert_eq!(
            to_data_matrix(dir.path(), &names, Some((2, 2))).unwrap().dim(),
            (2, 2, 2)
        );
    }

    #[test]
    fn test_empty_file_list() {
        let dir = tempdir().unwrap();
        assert_eq!(to_data_matrix(dir.path(), &[], None).unwrap().dim(), (0, 0, 0));
        assert_eq!(
            to_data_matrix(dir.path(), &[], Some((128, 128))).unwrap().dim(),
            (0, 128, 128)
        );
    }
}
