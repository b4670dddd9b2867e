use image::{DynamicImage, GrayImage, RgbImage, imageops::FilterType};
use imageproc::stats::histogram;
use ndarray::Array3;

use crate::error::{ForensicsError, Result};

pub fn gray_to_tensor(image: &GrayImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array3::zeros((1, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        tensor[[0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
    }

    tensor
}

pub fn rgb_to_tensor(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array3::zeros((3, height as usize, width as usize));

    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }

    tensor
}

/// Converts an image into a `(channels, height, width)` tensor scaled to `[0, 1]`.
pub fn to_input_tensor(
    image: &DynamicImage,
    channels: usize,
    width: u32,
    height: u32,
) -> Result<Array3<f32>> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ForensicsError::ShapeMismatch(
            "cannot resize an empty image".into(),
        ));
    }
    if width == 0 || height == 0 {
        return Err(ForensicsError::ShapeMismatch(format!(
            "invalid target resolution {width}x{height}"
        )));
    }

    match channels {
        1 => {
            let gray = image.to_luma8();
            let resized = image::imageops::resize(&gray, width, height, FilterType::Triangle);
            Ok(gray_to_tensor(&resized))
        }
        3 => {
            let rgb = image.to_rgb8();
            let resized = image::imageops::resize(&rgb, width, height, FilterType::Triangle);
            Ok(rgb_to_tensor(&resized))
        }
        other => Err(ForensicsError::ShapeMismatch(format!(
            "unsupported channel count {other}"
        ))),
    }
}

/// Histogram over every channel value of the image, all channels pooled.
pub fn calculate_histogram(image: &RgbImage) -> [u32; 256] {
    let per_channel = histogram(image);
    let mut pooled = [0u32; 256];

    for channel in &per_channel.channels {
        for (bucket, count) in channel.iter().enumerate() {
            pooled[bucket] += count;
        }
    }

    pooled
}

pub fn count_nonzero_buckets(histogram: &[u32; 256]) -> u32 {
    histogram.iter().filter(|&&count| count > 0).count() as u32
}
