//! RGBA pixel buffers handed between pipeline stages

use image::{ImageBuffer, Rgba, RgbaImage};

use crate::error::{OcrError, Result};

/// Bytes per RGBA pixel
pub const CHANNELS: usize = 4;

/// Largest raster the pipeline allocates, in pixels (16384 x 16384)
pub const MAX_PIXELS: u64 = 1 << 28;

/// Row-major RGBA raster.
///
/// `pixels.len() == width * height * 4` holds for every value of this type;
/// the constructors reject anything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw RGBA data, validating its shape
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(OcrError::Preprocessing(format!(
                "buffer dimensions must be positive, got {}x{}",
                width, height
            )));
        }

        let expected = byte_len(width, height)?;
        if pixels.len() != expected {
            return Err(OcrError::Preprocessing(format!(
                "invalid buffer size for {}x{}: expected {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }

        Ok(Self { width, height, pixels })
    }

    /// Buffer with every pixel set to `rgba`
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self> {
        let count = byte_len(width, height)? / CHANNELS;
        let pixels = rgba.repeat(count);
        Self::new(width, height, pixels)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Get buffer dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub(crate) fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// RGBA value at (x, y), or None outside the buffer
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = self.index(x, y);
        let mut px = [0u8; 4];
        px.copy_from_slice(&self.pixels[idx..idx + CHANNELS]);
        Some(px)
    }

    /// Byte offset of the pixel at (x, y)
    pub(crate) fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }

    /// Convert into an `image` raster for encoding or resampling
    pub fn into_image(self) -> Result<RgbaImage> {
        let (width, height) = (self.width, self.height);
        ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(width, height, self.pixels).ok_or_else(|| {
            OcrError::Preprocessing(format!("failed to create {}x{} image buffer", width, height))
        })
    }

    /// Take ownership of an `image` raster
    pub fn from_image(image: RgbaImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_raw())
    }
}

/// Whether a `width x height` raster stays within [`MAX_PIXELS`]
pub fn within_pixel_limit(width: u64, height: u64) -> bool {
    width.checked_mul(height).is_some_and(|n| n <= MAX_PIXELS)
}

fn byte_len(width: u32, height: u32) -> Result<usize> {
    if !within_pixel_limit(u64::from(width), u64::from(height)) {
        return Err(OcrError::Preprocessing(format!(
            "{}x{} exceeds the {} pixel limit",
            width, height, MAX_PIXELS
        )));
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(CHANNELS))
        .ok_or_else(|| OcrError::Preprocessing(format!("{}x{} buffer size overflows", width, height)))
}
