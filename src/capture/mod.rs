//! Raster Surface Layer
//!
//! Read-only access to rendered plan pages. The pipeline only ever reads
//! pixels inside an annotation's bounds; it never draws onto the page.

pub mod buffer;
pub mod region;

use std::path::Path;

use image::RgbaImage;

pub use buffer::PixelBuffer;
pub use region::{extract_region, Annotation, BoundingRect, Bounded, CropRect, DEFAULT_PADDING};

/// A drawable raster the extractor can read from.
pub trait RasterSurface {
    /// Backing raster, or None when no drawing context can be acquired
    fn raster(&self) -> Option<&RgbaImage>;
}

impl RasterSurface for RgbaImage {
    fn raster(&self) -> Option<&RgbaImage> {
        Some(self)
    }
}

/// A rendered plan page held in memory
#[derive(Debug)]
pub struct PageSurface {
    image: Option<RgbaImage>,
}

impl PageSurface {
    /// Wrap an already rendered page
    pub fn new(image: RgbaImage) -> Self {
        Self { image: Some(image) }
    }

    /// A page whose render target has not been created yet
    pub fn detached() -> Self {
        Self { image: None }
    }

    /// Decode a page image from disk
    pub fn open(path: &Path) -> image::ImageResult<Self> {
        let image = image::open(path)?.to_rgba8();
        Ok(Self::new(image))
    }

    /// Page dimensions as (width, height), if rendered
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.image.as_ref().map(|img| img.dimensions())
    }
}

impl RasterSurface for PageSurface {
    fn raster(&self) -> Option<&RgbaImage> {
        self.image.as_ref()
    }
}
