//! Planview OCR - text extraction for annotated construction plans
//!
//! Crops a user-drawn annotation out of a rendered page, cleans it up for
//! recognition, runs it through a shared Tesseract worker and reports the
//! confidence-filtered result.

pub mod capture;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod storage;
pub mod vision;

pub use capture::{extract_region, Annotation, BoundingRect, PageSurface, PixelBuffer, RasterSurface};
pub use config::{AppConfig, ProcessingOptions, RecognitionConfig, SegmentationMode};
pub use error::{OcrError, Result};
pub use orchestrator::{OcrOrchestrator, ProcessingFlag};
pub use vision::{
    match_tag_pattern, process_image, RecognitionResult, RecognitionService, TagPattern, TagPatternMatch, WorkerManager,
    WorkerState,
};
