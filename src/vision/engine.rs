//! Recognition engine interface
//!
//! The worker manager talks to engines only through these traits, which
//! keeps the external process swappable (and scriptable in tests).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

use crate::capture::PixelBuffer;
use crate::config::{RecognitionConfig, SegmentationMode};
use crate::error::{OcrError, Result};

/// Word bounding box in image pixels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

/// Single word reported by an engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineWord {
    pub text: String,
    /// 0 - 100
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Raw engine output for one image
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineOutput {
    pub text: String,
    /// Whole-region confidence, 0 - 100
    pub confidence: f32,
    pub words: Vec<EngineWord>,
}

/// Parameters applied to an initialized engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineParameters {
    pub whitelist: String,
    pub segmentation_mode: SegmentationMode,
}

impl From<&RecognitionConfig> for EngineParameters {
    fn from(config: &RecognitionConfig) -> Self {
        Self {
            whitelist: config.whitelist.clone(),
            segmentation_mode: config.mode,
        }
    }
}

/// Lossless PNG encoding of a pixel buffer
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

impl EncodedImage {
    /// Encode `buffer` as PNG
    pub fn encode(buffer: PixelBuffer) -> Result<Self> {
        let (width, height) = buffer.dimensions();
        let image = buffer.into_image()?;

        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .map_err(|e| OcrError::Recognition(format!("failed to encode image: {}", e)))?;

        Ok(Self { width, height, png })
    }
}

/// A stateful recognition engine instance.
///
/// Methods take `&mut self`; the worker serializes all calls.
#[async_trait]
pub trait RecognitionEngine: Send {
    /// Make a language's trained data available
    async fn load_language(&mut self, language: &str) -> anyhow::Result<()>;

    /// Select the language used for recognition
    async fn initialize(&mut self, language: &str) -> anyhow::Result<()>;

    async fn set_parameters(&mut self, parameters: &EngineParameters) -> anyhow::Result<()>;

    async fn recognize(&mut self, image: &EncodedImage) -> anyhow::Result<EngineOutput>;

    /// Release the engine; no calls follow
    async fn terminate(&mut self) -> anyhow::Result<()>;
}

/// Spawns fresh engine instances for the worker manager
#[async_trait]
pub trait EngineFactory: Send + Sync + 'static {
    async fn spawn(&self) -> anyhow::Result<Box<dyn RecognitionEngine>>;
}
