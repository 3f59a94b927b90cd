//! Text recognition service
//!
//! Encodes a preprocessed buffer, runs it through the shared worker and
//! shapes the engine output into a [`RecognitionResult`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

use super::engine::{BoundingBox, EncodedImage, EngineOutput, EngineWord};
use super::worker::WorkerManager;
use crate::capture::PixelBuffer;
use crate::config::RecognitionConfig;
use crate::error::Result;

/// A recognized word
pub type Word = EngineWord;

/// Recognition result for one region
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    /// Whole-region text, trimmed
    pub text: String,
    /// Whole-region confidence (0 - 100)
    pub confidence: f32,
    /// Box of the first recognized word, zero when none
    pub primary_bbox: BoundingBox,
    /// Words at or above the confidence threshold, in engine order
    pub words: Vec<Word>,
}

impl RecognitionResult {
    /// Build a result from raw engine output.
    ///
    /// Only the word list is filtered; text, confidence and the primary box
    /// describe the unfiltered recognition.
    pub fn from_engine(output: EngineOutput, confidence_threshold: f32) -> Self {
        let primary_bbox = output.words.first().map(|w| w.bbox).unwrap_or_default();
        let words = output
            .words
            .into_iter()
            .filter(|w| w.confidence >= confidence_threshold)
            .collect();

        Self {
            text: output.text.trim().to_string(),
            confidence: output.confidence,
            primary_bbox,
            words,
        }
    }
}

/// Submits buffers to the recognition worker
#[derive(Clone)]
pub struct RecognitionService {
    manager: Arc<WorkerManager>,
}

impl RecognitionService {
    pub fn new(manager: Arc<WorkerManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<WorkerManager> {
        &self.manager
    }

    /// Recognize the text in `buffer`
    pub async fn recognize(&self, buffer: PixelBuffer, config: &RecognitionConfig) -> Result<RecognitionResult> {
        let start = Instant::now();
        let image = EncodedImage::encode(buffer)?;

        let output = self.manager.recognize(&image, config).await.map_err(|e| {
            error!(
                error = %e,
                width = image.width,
                height = image.height,
                language = %config.language,
                "recognition request failed"
            );
            e
        })?;

        let result = RecognitionResult::from_engine(output, config.confidence_threshold);
        debug!(
            confidence = result.confidence,
            words = result.words.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "text recognized"
        );
        Ok(result)
    }
}
