//! Tesseract CLI backend
//!
//! Drives the `tesseract` executable. Each recognition pipes a PNG through
//! `tesseract stdin stdout ... tsv` and parses the word table it prints.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::engine::{BoundingBox, EncodedImage, EngineFactory, EngineOutput, EngineParameters, EngineWord, RecognitionEngine};
use crate::config::EngineSettings;

/// TSV row level for individual words
const WORD_LEVEL: u32 = 5;

/// Tesseract engine bound to one executable
pub struct TesseractEngine {
    binary: String,
    timeout: Duration,
    language: Option<String>,
    parameters: Option<EngineParameters>,
    terminated: bool,
}

impl TesseractEngine {
    /// Create an engine for `binary` after checking it runs
    pub async fn spawn(settings: &EngineSettings) -> Result<Self> {
        info!("Starting Tesseract engine: {}", settings.binary);

        let output = Command::new(&settings.binary)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("Failed to run '{}'", settings.binary))?;

        if !output.status.success() {
            bail!("'{} --version' exited with {}", settings.binary, output.status);
        }

        let version = String::from_utf8_lossy(&output.stdout);
        debug!("Tesseract version: {}", version.lines().next().unwrap_or("unknown"));

        Ok(Self {
            binary: settings.binary.clone(),
            timeout: Duration::from_secs(settings.timeout_secs.max(1)),
            language: None,
            parameters: None,
            terminated: false,
        })
    }

    /// Languages with installed trained data
    pub async fn available_languages(&self) -> Result<Vec<String>> {
        let output = Command::new(&self.binary)
            .arg("--list-langs")
            .output()
            .await
            .context("Failed to list Tesseract languages")?;

        if !output.status.success() {
            bail!("'--list-langs' exited with {}", output.status);
        }

        // Older releases print the list on stderr
        let mut listing = String::from_utf8_lossy(&output.stdout).into_owned();
        listing.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(parse_language_list(&listing))
    }

    fn ensure_live(&self) -> Result<()> {
        if self.terminated {
            bail!("Tesseract engine has been terminated");
        }
        Ok(())
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    async fn load_language(&mut self, language: &str) -> Result<()> {
        self.ensure_live()?;

        let languages = self.available_languages().await?;
        if !languages.iter().any(|l| l == language) {
            warn!("Language '{}' not installed; available: {:?}", language, languages);
            bail!("Tesseract language '{}' is not installed", language);
        }
        Ok(())
    }

    async fn initialize(&mut self, language: &str) -> Result<()> {
        self.ensure_live()?;
        self.language = Some(language.to_string());
        info!("Tesseract initialized with language: {}", language);
        Ok(())
    }

    async fn set_parameters(&mut self, parameters: &EngineParameters) -> Result<()> {
        self.ensure_live()?;
        self.parameters = Some(parameters.clone());
        Ok(())
    }

    async fn recognize(&mut self, image: &EncodedImage) -> Result<EngineOutput> {
        self.ensure_live()?;
        let language = self
            .language
            .as_deref()
            .ok_or_else(|| anyhow!("Tesseract engine used before initialize"))?;

        debug!("Tesseract: Processing {}x{} image", image.width, image.height);

        let mut command = Command::new(&self.binary);
        command.args(["stdin", "stdout", "-l", language]);
        if let Some(params) = &self.parameters {
            command
                .arg("--psm")
                .arg(params.segmentation_mode.engine_code().to_string());
            if !params.whitelist.is_empty() {
                command
                    .arg("-c")
                    .arg(format!("tessedit_char_whitelist={}", params.whitelist));
            }
        }
        command
            .arg("tsv")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().context("Failed to start Tesseract")?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Tesseract stdin unavailable"))?;

        let run = async move {
            stdin
                .write_all(&image.png)
                .await
                .context("Failed to write image to Tesseract")?;
            drop(stdin);
            child.wait_with_output().await.context("Tesseract did not finish")
        };

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| anyhow!("Tesseract timed out after {:?}", self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Tesseract exited with {}: {}", output.status, stderr.trim());
        }

        let result = parse_tsv(&String::from_utf8_lossy(&output.stdout))?;
        debug!("Tesseract: Found {} words", result.words.len());
        Ok(result)
    }

    async fn terminate(&mut self) -> Result<()> {
        self.terminated = true;
        self.language = None;
        self.parameters = None;
        info!("Tesseract engine terminated");
        Ok(())
    }
}

/// Factory for Tesseract engines with fixed settings
#[derive(Debug, Clone, Default)]
pub struct TesseractFactory {
    settings: EngineSettings,
}

impl TesseractFactory {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl EngineFactory for TesseractFactory {
    async fn spawn(&self) -> Result<Box<dyn RecognitionEngine>> {
        let engine = TesseractEngine::spawn(&self.settings).await?;
        Ok(Box::new(engine))
    }
}

/// Parse `--list-langs` output
fn parse_language_list(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("List of available languages"))
        .map(str::to_string)
        .collect()
}

/// Parse Tesseract TSV output into words, line-joined text and mean confidence
fn parse_tsv(tsv: &str) -> Result<EngineOutput> {
    let mut words = Vec::new();
    let mut lines: BTreeMap<(u32, u32, u32, u32), Vec<String>> = BTreeMap::new();

    for (row, line) in tsv.lines().enumerate() {
        if row == 0 && line.starts_with("level") {
            continue;
        }
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 11 {
            continue;
        }

        let num = |i: usize| -> Result<u32> {
            cols[i]
                .trim()
                .parse::<u32>()
                .with_context(|| format!("Bad TSV column {} on row {}: '{}'", i, row, cols[i]))
        };

        if num(0)? != WORD_LEVEL {
            continue;
        }

        let text = cols.get(11).map(|t| t.trim()).unwrap_or_default();
        let confidence: f32 = cols[10]
            .trim()
            .parse()
            .with_context(|| format!("Bad confidence on row {}: '{}'", row, cols[10]))?;
        if text.is_empty() || confidence < 0.0 {
            continue;
        }

        let (left, top, width, height) = (num(6)?, num(7)?, num(8)?, num(9)?);
        lines
            .entry((num(1)?, num(2)?, num(3)?, num(4)?))
            .or_default()
            .push(text.to_string());

        words.push(EngineWord {
            text: text.to_string(),
            confidence: confidence.clamp(0.0, 100.0),
            bbox: BoundingBox {
                x0: left,
                y0: top,
                x1: left + width,
                y1: top + height,
            },
        });
    }

    let text = lines
        .values()
        .map(|line| line.join(" "))
        .collect::<Vec<_>>()
        .join("\n");

    let confidence = if words.is_empty() {
        0.0
    } else {
        words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32
    };

    Ok(EngineOutput {
        text,
        confidence,
        words,
    })
}
