//! Region extraction for annotations
//!
//! Crops the padded bounding rectangle of an annotation out of a page
//! surface into a fresh white-backed buffer.

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::buffer::{within_pixel_limit, PixelBuffer, CHANNELS, MAX_PIXELS};
use super::RasterSurface;
use crate::error::{OcrError, Result};

/// Padding added on every side of the annotation, in surface pixels
pub const DEFAULT_PADDING: f32 = 5.0;

const WHITE: [u8; 4] = [255, 255, 255, 255];

/// Axis-aligned rectangle in surface coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingRect {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self { left, top, width, height }
    }
}

/// Anything that can report its bounding rectangle on the surface
pub trait Bounded {
    fn bounding_rect(&self) -> BoundingRect;
}

impl Bounded for BoundingRect {
    fn bounding_rect(&self) -> BoundingRect {
        *self
    }
}

/// A user-drawn box annotation on a plan page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Annotation identifier
    pub id: String,
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
    /// Rotation in degrees around the top-left corner
    #[serde(default)]
    pub angle: f32,
}

impl Annotation {
    /// Unrotated box annotation
    pub fn new(id: impl Into<String>, left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            id: id.into(),
            left,
            top,
            width,
            height,
            angle: 0.0,
        }
    }

    pub fn with_angle(mut self, angle: f32) -> Self {
        self.angle = angle;
        self
    }
}

impl Bounded for Annotation {
    /// Axis-aligned bounds of the rotated box
    fn bounding_rect(&self) -> BoundingRect {
        if self.angle % 360.0 == 0.0 {
            return BoundingRect::new(self.left, self.top, self.width, self.height);
        }

        let (sin, cos) = self.angle.to_radians().sin_cos();
        let corners = [
            (0.0, 0.0),
            (self.width, 0.0),
            (0.0, self.height),
            (self.width, self.height),
        ]
        .map(|(x, y)| (self.left + x * cos - y * sin, self.top + x * sin + y * cos));

        let min_x = corners.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
        let min_y = corners.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
        let max_y = corners.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

        BoundingRect::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }
}

/// Integer crop rectangle; the origin is never negative
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRect {
    /// Padded crop rectangle for `bounds`
    pub fn from_bounds(bounds: BoundingRect, padding: f32) -> Result<Self> {
        let left = (f64::from(bounds.left) - f64::from(padding)).floor().max(0.0);
        let top = (f64::from(bounds.top) - f64::from(padding)).floor().max(0.0);
        let width = (f64::from(bounds.width) + 2.0 * f64::from(padding)).ceil();
        let height = (f64::from(bounds.height) + 2.0 * f64::from(padding)).ceil();

        if !(width.is_finite() && height.is_finite() && left.is_finite() && top.is_finite()) {
            return Err(OcrError::Extraction(format!(
                "non-finite crop rectangle for bounds {:?}",
                bounds
            )));
        }
        if width <= 0.0 || height <= 0.0 {
            return Err(OcrError::Extraction(format!(
                "computed crop size {}x{} is not positive",
                width, height
            )));
        }

        let max = f64::from(u32::MAX);
        if width > max || height > max || left > max || top > max {
            return Err(OcrError::Extraction(format!(
                "crop rectangle {}x{} at ({}, {}) is out of range",
                width, height, left, top
            )));
        }

        if !within_pixel_limit(width as u64, height as u64) {
            return Err(OcrError::Extraction(format!(
                "crop size {}x{} exceeds the {} pixel limit",
                width, height, MAX_PIXELS
            )));
        }

        Ok(Self {
            left: left as u32,
            top: top as u32,
            width: width as u32,
            height: height as u32,
        })
    }
}

/// Crop the padded bounds of `object` out of `surface`.
///
/// The destination starts out white and the source is composited over it,
/// so transparent page pixels and areas past the page edge read as paper.
pub fn extract_region<S, O>(surface: Option<&S>, object: Option<&O>, padding: f32) -> Result<PixelBuffer>
where
    S: RasterSurface + ?Sized,
    O: Bounded + ?Sized,
{
    let (Some(surface), Some(object)) = (surface, object) else {
        error!("invalid surface or annotation");
        return Err(OcrError::Extraction("surface or annotation is missing".to_string()));
    };

    let Some(source) = surface.raster() else {
        error!("could not acquire surface drawing context");
        return Err(OcrError::Extraction("could not acquire drawing context".to_string()));
    };

    let crop = CropRect::from_bounds(object.bounding_rect(), padding)?;
    let mut target = PixelBuffer::filled(crop.width, crop.height, WHITE)
        .map_err(|e| OcrError::Extraction(e.to_string()))?;

    blit_over(source, &crop, &mut target);

    debug!(
        width = crop.width,
        height = crop.height,
        left = crop.left,
        top = crop.top,
        "image data extracted"
    );

    Ok(target)
}

/// Source-over composite of `source[crop]` onto `target` at (0, 0)
fn blit_over(source: &RgbaImage, crop: &CropRect, target: &mut PixelBuffer) {
    let (src_w, src_h) = source.dimensions();
    if crop.left >= src_w || crop.top >= src_h {
        return;
    }

    let copy_w = crop.width.min(src_w - crop.left);
    let copy_h = crop.height.min(src_h - crop.top);

    for dy in 0..copy_h {
        for dx in 0..copy_w {
            let src = source.get_pixel(crop.left + dx, crop.top + dy).0;
            let idx = target.index(dx, dy);
            let dst = &mut target.pixels_mut()[idx..idx + CHANNELS];
            composite(src, dst);
        }
    }
}

fn composite(src: [u8; 4], dst: &mut [u8]) {
    let alpha = u32::from(src[3]);
    match alpha {
        255 => dst.copy_from_slice(&src),
        0 => {}
        _ => {
            for c in 0..3 {
                let blended = u32::from(src[c]) * alpha + u32::from(dst[c]) * (255 - alpha);
                dst[c] = ((blended + 127) / 255) as u8;
            }
            dst[3] = 255;
        }
    }
}
