//! Vision/OCR Layer
//!
//! Preprocessing, the recognition engine and its worker, and tag matching
//! on recognized text.

pub mod engine;
pub mod ocr;
pub mod ocr_preprocess;
pub mod patterns;
pub mod tesseract;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{BoundingBox, EncodedImage, EngineFactory, EngineOutput, EngineParameters, RecognitionEngine};
pub use ocr::{RecognitionResult, RecognitionService, Word};
pub use ocr_preprocess::process_image;
pub use patterns::{match_tag_pattern, TagPattern, TagPatternMatch};
pub use tesseract::{TesseractEngine, TesseractFactory};
pub use worker::{EngineWorker, WorkerManager, WorkerState};
