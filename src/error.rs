//! Error taxonomy for the extraction pipeline

use thiserror::Error;

/// Failures surfaced by the annotation OCR pipeline.
///
/// Cloneable so a single failed initialization can be handed to every
/// request that was waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OcrError {
    #[error("failed to extract region: {0}")]
    Extraction(String),

    #[error("failed to preprocess image: {0}")]
    Preprocessing(String),

    #[error("failed to initialize recognition worker: {0}")]
    WorkerInitialization(String),

    #[error("text recognition failed: {0}")]
    Recognition(String),

    #[error("recognition worker was torn down while the request was in flight")]
    TeardownInFlight,
}

impl OcrError {
    /// Short machine-friendly name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            OcrError::Extraction(_) => "extraction",
            OcrError::Preprocessing(_) => "preprocessing",
            OcrError::WorkerInitialization(_) => "worker_initialization",
            OcrError::Recognition(_) => "recognition",
            OcrError::TeardownInFlight => "teardown_in_flight",
        }
    }
}

pub type Result<T> = std::result::Result<T, OcrError>;
