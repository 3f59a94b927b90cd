//! Image preprocessing filters for OCR optimization
//!
//! Fixed-order pipeline tuned for line-art drawings:
//! scale, contrast (with implicit grayscale), median denoise, binarize.
//! Every stage consumes a buffer and hands back a new one.

use image::imageops::{self, FilterType};
use tracing::debug;

use crate::capture::buffer::{within_pixel_limit, PixelBuffer, CHANNELS, MAX_PIXELS};
use crate::config::ProcessingOptions;
use crate::error::{OcrError, Result};

/// Run all enabled stages over `buffer`
pub fn process_image(buffer: PixelBuffer, options: &ProcessingOptions) -> Result<PixelBuffer> {
    let original = buffer.dimensions();
    let mut processed = buffer;

    if options.scale != 1.0 {
        processed = scale_image(processed, options.scale)?;
    }

    if options.contrast != 1.0 {
        processed = enhance_contrast(processed, options.contrast)?;
    }

    if options.denoise {
        processed = denoise_image(processed);
    }

    processed = binarize(processed, options.threshold);

    debug!(
        original_size = %format!("{}x{}", original.0, original.1),
        processed_size = %format!("{}x{}", processed.width(), processed.height()),
        ?options,
        "image processed"
    );

    Ok(processed)
}

/// Target dimensions for a scale factor; truncates toward zero
pub fn scaled_dimensions(width: u32, height: u32, scale: f32) -> Result<(u32, u32)> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(OcrError::Preprocessing(format!("invalid scale factor {}", scale)));
    }

    let new_width = (f64::from(width) * f64::from(scale)).floor();
    let new_height = (f64::from(height) * f64::from(scale)).floor();

    if new_width < 1.0 || new_height < 1.0 {
        return Err(OcrError::Preprocessing(format!(
            "scaling {}x{} by {} leaves an empty image",
            width, height, scale
        )));
    }
    if new_width > f64::from(u32::MAX) || new_height > f64::from(u32::MAX) {
        return Err(OcrError::Preprocessing(format!(
            "scaling {}x{} by {} overflows",
            width, height, scale
        )));
    }

    if !within_pixel_limit(new_width as u64, new_height as u64) {
        return Err(OcrError::Preprocessing(format!(
            "scaling {}x{} by {} exceeds the {} pixel limit",
            width, height, scale, MAX_PIXELS
        )));
    }

    Ok((new_width as u32, new_height as u32))
}

/// Resample to `floor(width * scale) x floor(height * scale)`
fn scale_image(buffer: PixelBuffer, scale: f32) -> Result<PixelBuffer> {
    let (width, height) = buffer.dimensions();
    let (new_width, new_height) = scaled_dimensions(width, height, scale)?;

    let source = buffer.into_image()?;
    let resized = imageops::resize(&source, new_width, new_height, FilterType::Triangle);

    debug!(width, height, new_width, new_height, scale, "image scaled");
    PixelBuffer::from_image(resized)
}

/// Contrast stretch around mid-gray using the channel average.
///
/// R, G and B all receive the same value, so the output is grayscale.
fn enhance_contrast(buffer: PixelBuffer, contrast: f32) -> Result<PixelBuffer> {
    let factor = contrast_factor(contrast);
    if !factor.is_finite() {
        return Err(OcrError::Preprocessing(format!("invalid contrast value {}", contrast)));
    }

    let (width, height) = buffer.dimensions();
    let mut data = buffer.into_pixels();

    for chunk in data.chunks_exact_mut(CHANNELS) {
        let avg = channel_average(chunk);
        let value = to_channel(factor * (avg - 128.0) + 128.0);
        chunk[0] = value;
        chunk[1] = value;
        chunk[2] = value;
        // Alpha unchanged
    }

    debug!(contrast, factor, "contrast enhanced");
    PixelBuffer::new(width, height, data)
}

/// `259 * (c + 255) / (255 * (259 - c))`
pub fn contrast_factor(contrast: f32) -> f64 {
    let c = f64::from(contrast);
    (259.0 * (c + 255.0)) / (255.0 * (259.0 - c))
}

/// 3x3 median filter keyed on the red channel, interior pixels only.
///
/// Filtering happens in place in raster order, so a neighborhood already
/// contains the filtered values of the pixels above and to the left.
fn denoise_image(buffer: PixelBuffer) -> PixelBuffer {
    let (width, height) = buffer.dimensions();
    if width < 3 || height < 3 {
        return buffer;
    }

    let w = width as usize;
    let h = height as usize;
    let mut result = buffer;
    let data = result.pixels_mut();

    let mut neighbors = [0u8; 9];
    for y in 1..(h - 1) {
        for x in 1..(w - 1) {
            let mut n = 0;
            for ny in (y - 1)..=(y + 1) {
                for nx in (x - 1)..=(x + 1) {
                    neighbors[n] = data[(ny * w + nx) * CHANNELS];
                    n += 1;
                }
            }
            neighbors.sort_unstable();
            let median = neighbors[4];

            let idx = (y * w + x) * CHANNELS;
            data[idx] = median;
            data[idx + 1] = median;
            data[idx + 2] = median;
        }
    }

    debug!(width, height, "image denoised");
    result
}

/// Pure black/white by channel average; `avg > threshold` is white
fn binarize(buffer: PixelBuffer, threshold: u8) -> PixelBuffer {
    let threshold = f64::from(threshold);
    let mut result = buffer;

    for chunk in result.pixels_mut().chunks_exact_mut(CHANNELS) {
        let value = if channel_average(chunk) > threshold { 255 } else { 0 };
        chunk[0] = value;
        chunk[1] = value;
        chunk[2] = value;
    }

    debug!(threshold, "image binarized");
    result
}

fn channel_average(px: &[u8]) -> f64 {
    (f64::from(px[0]) + f64::from(px[1]) + f64::from(px[2])) / 3.0
}

fn to_channel(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
