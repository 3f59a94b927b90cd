//! Application Configuration
//!
//! Processing and recognition settings stored in TOML format. Every section
//! is `#[serde(default)]`, so a partial file is merged field by field onto
//! the documented defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::capture::DEFAULT_PADDING;
use crate::vision::patterns::TagPattern;

/// Characters the recognizer may emit unless configured otherwise
pub const DEFAULT_WHITELIST: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-";

/// Application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Image preprocessing before recognition
    pub processing: ProcessingOptions,
    /// Recognition engine settings
    pub recognition: RecognitionConfig,
    /// Region extraction settings
    pub extraction: ExtractionSettings,
    /// External engine process settings
    pub engine: EngineSettings,
    /// Tag patterns checked against extracted text
    pub patterns: Vec<TagPattern>,
}

/// Preprocessing applied to an extracted region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    /// Contrast factor (1.0 = unchanged)
    pub contrast: f32,
    /// Binarization threshold; averages strictly above it become white
    pub threshold: u8,
    /// Apply the 3x3 median filter
    pub denoise: bool,
    /// Resample factor applied before the other stages
    pub scale: f32,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            contrast: 1.2,
            threshold: 128,
            denoise: true,
            scale: 1.0,
        }
    }
}

/// How the engine segments the image into text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationMode {
    /// Treat the image as a single text line
    #[default]
    SingleLine,
    /// Fully automatic page segmentation
    Document,
}

impl SegmentationMode {
    /// Engine page segmentation code
    pub fn engine_code(self) -> u8 {
        match self {
            SegmentationMode::SingleLine => 7,
            SegmentationMode::Document => 3,
        }
    }
}

/// Recognition settings for a single request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Engine language code (e.g. "eng")
    pub language: String,
    /// Segmentation mode
    pub mode: SegmentationMode,
    /// Minimum word confidence (0 - 100) kept in the word list
    pub confidence_threshold: f32,
    /// Characters the engine may emit
    pub whitelist: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            language: "eng".to_string(),
            mode: SegmentationMode::SingleLine,
            confidence_threshold: 60.0,
            whitelist: DEFAULT_WHITELIST.to_string(),
        }
    }
}

/// Region extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Padding around the annotation, in surface pixels
    pub padding: f32,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            padding: DEFAULT_PADDING,
        }
    }
}

/// External recognition process settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Engine executable name or path
    pub binary: String,
    /// Upper bound for one recognition call
    pub timeout_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            binary: "tesseract".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {:?}", path))?;
    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {:?}", path))?;
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();

        assert!((config.processing.contrast - 1.2).abs() < f32::EPSILON);
        assert_eq!(config.processing.threshold, 128);
        assert!(config.processing.denoise);
        assert!((config.processing.scale - 1.0).abs() < f32::EPSILON);

        assert_eq!(config.recognition.language, "eng");
        assert_eq!(config.recognition.mode, SegmentationMode::SingleLine);
        assert!((config.recognition.confidence_threshold - 60.0).abs() < f32::EPSILON);
        assert_eq!(config.recognition.whitelist, DEFAULT_WHITELIST);

        assert!((config.extraction.padding - 5.0).abs() < f32::EPSILON);
        assert_eq!(config.engine.binary, "tesseract");
        assert!(config.patterns.is_empty());
    }

    #[test]
    fn test_segmentation_codes() {
        assert_eq!(SegmentationMode::SingleLine.engine_code(), 7);
        assert_eq!(SegmentationMode::Document.engine_code(), 3);
    }

    #[test]
    fn test_partial_file_merges_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [processing]
            threshold = 100

            [recognition]
            mode = "document"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.processing.threshold, 100);
        assert!((parsed.processing.contrast - 1.2).abs() < f32::EPSILON);
        assert!(parsed.processing.denoise);
        assert_eq!(parsed.recognition.mode, SegmentationMode::Document);
        assert_eq!(parsed.recognition.language, "eng");
        assert_eq!(parsed.engine, EngineSettings::default());
    }

    #[test]
    fn test_config_with_patterns() {
        let parsed: AppConfig = toml::from_str(
            r#"
            [[patterns]]
            id = "door"
            prefix = "D-"
            description = "Door tags"
            schedule_table = "doors"
            "#,
        )
        .unwrap();

        assert_eq!(parsed.patterns.len(), 1);
        assert_eq!(parsed.patterns[0].prefix, "D-");
        assert!(parsed.patterns[0].linked_annotations.is_empty());
    }

    #[test]
    fn test_save_and_load_config() {
        let mut config = AppConfig::default();
        config.recognition.confidence_threshold = 75.0;
        config.processing.scale = 2.0;

        let temp_file = NamedTempFile::new().unwrap();
        save_config(&config, temp_file.path()).unwrap();

        let loaded = load_config(temp_file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "this is not valid toml {{{{").unwrap();

        let result = load_config(temp_file.path());
        assert!(result.is_err());
    }
}
