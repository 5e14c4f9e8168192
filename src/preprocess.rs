//! Image normalization ahead of text recognition.
//!
//! Decodes an uploaded raster of any format/channel depth, converts it to
//! grayscale and binarizes it with a global Otsu threshold.

use crate::error::PipelineError;
use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};
use std::io::Cursor;
use tracing::{debug, info};

/// Decode `data` and produce a two-level (0/255) luminance image.
pub fn normalize(data: &[u8]) -> Result<GrayImage, PipelineError> {
    let decoded = image::load_from_memory(data)
        .map_err(|e| PipelineError::Input(format!("failed to decode image: {}", e)))?;

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(PipelineError::Input("image has no pixels".to_string()));
    }

    let gray = decoded.to_luma8();
    let threshold = otsu_threshold(&gray);
    info!(
        "Normalized image {}x{} (otsu threshold={})",
        gray.width(),
        gray.height(),
        threshold
    );

    Ok(binarize(&gray, threshold))
}

/// Pick the threshold that maximizes between-class variance, which is the
/// same as minimizing the weighted within-class variance.
pub fn otsu_threshold(image: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let total = (image.width() as u64 * image.height() as u64) as f64;
    let sum_total: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, &count)| level as f64 * count as f64)
        .sum();

    let mut sum_background = 0.0;
    let mut weight_background = 0.0;
    let mut max_variance = 0.0;
    let mut threshold = 0u8;

    for (level, &count) in histogram.iter().enumerate() {
        weight_background += count as f64;
        if weight_background == 0.0 {
            continue;
        }
        let weight_foreground = total - weight_background;
        if weight_foreground == 0.0 {
            break;
        }

        sum_background += level as f64 * count as f64;
        let mean_background = sum_background / weight_background;
        let mean_foreground = (sum_total - sum_background) / weight_foreground;

        let variance =
            weight_background * weight_foreground * (mean_background - mean_foreground).powi(2);
        if variance > max_variance {
            max_variance = variance;
            threshold = level as u8;
        }
    }

    threshold
}

/// Pixels strictly above `threshold` become white, the rest black.
pub fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y)[0] > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Encode a binarized image as PNG for transport to the recognizer.
pub fn encode_png(image: &GrayImage) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(image.clone())
        .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)?;
    debug!("Encoded binarized image as PNG ({} bytes)", buf.len());
    Ok(buf)
}
