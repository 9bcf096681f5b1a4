use std::path::{Path, PathBuf};

use image::{imageops::FilterType, DynamicImage, GenericImageView, GrayImage, Luma};
use ndarray::Array2;
use nshare::ToNdarray2;

/// Turns a (height, width) ndarray into a grayscale image
pub fn array_to_image(arr: &Array2<u8>) -> GrayImage {
    let (height, width) = arr.dim();
    GrayImage::from_fn(width as u32, height as u32, |x, y| {
        Luma([arr[[y as usize, x as usize]]])
    })
}

/// Returns the image as pre-scaled (height, width) array, ready to be put into
/// an encoder. Images of a different size are resized to `(height, width)`.
pub fn image_to_ndarray(img: &DynamicImage, (height, width): (usize, usize)) -> Array2<f32> {
    let gray = if img.height() as usize != height || img.width() as usize != width {
        img.resize_exact(width as u32, height as u32, FilterType::Triangle)
            .to_luma8()
    } else {
        img.to_luma8()
    };
    gray.into_ndarray2().mapv(|x| x as f32 / 255.0)
}

/// Turns output from neural net into a pixel value
pub fn to_pixel(x: f32) -> u8 {
    (x.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// `/path/to/<stem>-reconstructed-ae.png` for `/path/to/<stem>.<ext>`
pub fn reconstruction_path(image: &Path) -> PathBuf {
    sibling_path(image, "-reconstructed-ae.png")
}

/// `/path/to/<stem>-latents.npy` for `/path/to/<stem>.<ext>`
pub fn latents_path(image: &Path) -> PathBuf {
    sibling_path(image, "-latents.npy")
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_stem().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}
