//! Annotation OCR pipeline
//!
//! Extract -> preprocess -> recognize for one annotation, with upward
//! callbacks and a processing flag that UI collaborators can watch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

use crate::capture::{extract_region, Bounded, RasterSurface, DEFAULT_PADDING};
use crate::config::{AppConfig, ProcessingOptions, RecognitionConfig};
use crate::error::Result;
use crate::vision::{match_tag_pattern, process_image, RecognitionResult, RecognitionService, TagPattern, TagPatternMatch};

pub type TextExtractedCallback = Box<dyn Fn(&str, f32, &RecognitionResult) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;
pub type PatternMatchCallback = Box<dyn Fn(&TagPatternMatch) + Send + Sync>;

/// Shared view of whether any annotation is being processed
#[derive(Debug, Clone, Default)]
pub struct ProcessingFlag(Arc<AtomicUsize>);

impl ProcessingFlag {
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst) > 0
    }

    fn raise(&self) -> ProcessingGuard<'_> {
        self.0.fetch_add(1, Ordering::SeqCst);
        ProcessingGuard(&self.0)
    }
}

/// Lowers the flag on drop, on every exit path
struct ProcessingGuard<'a>(&'a AtomicUsize);

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs the OCR pipeline for annotations drawn on a page
pub struct OcrOrchestrator {
    service: RecognitionService,
    padding: f32,
    patterns: Vec<TagPattern>,
    default_options: ProcessingOptions,
    default_config: RecognitionConfig,
    on_text_extracted: TextExtractedCallback,
    on_error: Option<ErrorCallback>,
    on_pattern_match: Option<PatternMatchCallback>,
    processing: ProcessingFlag,
}

impl OcrOrchestrator {
    pub fn new<F>(service: RecognitionService, on_text_extracted: F) -> Self
    where
        F: Fn(&str, f32, &RecognitionResult) + Send + Sync + 'static,
    {
        Self {
            service,
            padding: DEFAULT_PADDING,
            patterns: Vec::new(),
            default_options: ProcessingOptions::default(),
            default_config: RecognitionConfig::default(),
            on_text_extracted: Box::new(on_text_extracted),
            on_error: None,
            on_pattern_match: None,
            processing: ProcessingFlag::default(),
        }
    }

    pub fn with_on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(on_error));
        self
    }

    pub fn with_on_pattern_match<F>(mut self, on_pattern_match: F) -> Self
    where
        F: Fn(&TagPatternMatch) + Send + Sync + 'static,
    {
        self.on_pattern_match = Some(Box::new(on_pattern_match));
        self
    }

    pub fn with_patterns(mut self, patterns: Vec<TagPattern>) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn with_padding(mut self, padding: f32) -> Self {
        self.padding = padding;
        self
    }

    /// Take padding, patterns and per-call defaults from `config`
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.padding = config.extraction.padding;
        self.patterns = config.patterns.clone();
        self.default_options = config.processing.clone();
        self.default_config = config.recognition.clone();
        self
    }

    /// True while at least one `process_annotation` call is running
    pub fn is_processing(&self) -> bool {
        self.processing.is_set()
    }

    /// Handle for observers that outlive a borrow of the orchestrator
    pub fn processing_flag(&self) -> ProcessingFlag {
        self.processing.clone()
    }

    pub fn patterns(&self) -> &[TagPattern] {
        &self.patterns
    }

    /// Extract, preprocess and recognize the text under `annotation`.
    ///
    /// `options` and `config` fall back to the orchestrator's defaults. On
    /// success `on_text_extracted` runs, followed by `on_pattern_match` when
    /// a pattern matches. On failure `on_error` receives the message and the
    /// error is returned unchanged.
    pub async fn process_annotation<S, O>(
        &self,
        surface: Option<&S>,
        annotation: Option<&O>,
        options: Option<&ProcessingOptions>,
        config: Option<&RecognitionConfig>,
    ) -> Result<RecognitionResult>
    where
        S: RasterSurface + ?Sized,
        O: Bounded + ?Sized,
    {
        let _guard = self.processing.raise();
        let start = Instant::now();
        info!("starting OCR for annotation");

        let outcome = self.run_pipeline(surface, annotation, options, config).await;

        match outcome {
            Ok(result) => {
                info!(
                    text = %result.text,
                    confidence = result.confidence,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "OCR completed"
                );
                (self.on_text_extracted)(&result.text, result.confidence, &result);
                self.report_pattern_match(&result);
                Ok(result)
            }
            Err(err) => {
                error!(kind = err.kind(), error = %err, "failed to process annotation");
                if let Some(on_error) = &self.on_error {
                    on_error(&err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Terminate the shared recognition worker
    pub async fn cleanup(&self) {
        self.service.manager().cleanup().await;
    }

    async fn run_pipeline<S, O>(
        &self,
        surface: Option<&S>,
        annotation: Option<&O>,
        options: Option<&ProcessingOptions>,
        config: Option<&RecognitionConfig>,
    ) -> Result<RecognitionResult>
    where
        S: RasterSurface + ?Sized,
        O: Bounded + ?Sized,
    {
        let options = options.unwrap_or(&self.default_options);
        let config = config.unwrap_or(&self.default_config);

        let raw = extract_region(surface, annotation, self.padding)?;
        let processed = process_image(raw, options)?;
        self.service.recognize(processed, config).await
    }

    fn report_pattern_match(&self, result: &RecognitionResult) {
        if self.patterns.is_empty() {
            return;
        }
        let Some(found) = match_tag_pattern(&result.text, &self.patterns) else {
            return;
        };
        debug!(prefix = %found.pattern.prefix, "pattern matched");
        if let Some(on_match) = &self.on_pattern_match {
            on_match(&found);
        }
    }
}
