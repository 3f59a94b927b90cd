//! Planview OCR - extract tag text from annotated plan pages
//!
//! Runs a single annotation through the extraction pipeline from the
//! command line, or writes a default configuration file.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use planview_ocr::capture::{Annotation, PageSurface};
use planview_ocr::config::{self, AppConfig, SegmentationMode};
use planview_ocr::orchestrator::OcrOrchestrator;
use planview_ocr::storage;
use planview_ocr::vision::{RecognitionResult, RecognitionService, TagPatternMatch, TesseractFactory, WorkerManager};

/// Planview OCR - annotation text extraction for construction plans
#[derive(Parser, Debug)]
#[command(name = "planview-ocr")]
#[command(about = "Extract tag text from annotated regions of plan drawings")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Recognize the text inside one annotation of a page image
    Extract(ExtractArgs),
    /// Write the default configuration file
    InitConfig {
        /// Destination (defaults to the user config directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Rendered page image
    image: PathBuf,

    #[arg(long, allow_negative_numbers = true)]
    left: f32,
    #[arg(long, allow_negative_numbers = true)]
    top: f32,
    #[arg(long)]
    width: f32,
    #[arg(long)]
    height: f32,
    /// Rotation in degrees about the top-left corner
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    angle: f32,

    /// Padding around the annotation in pixels
    #[arg(long)]
    padding: Option<f32>,
    #[arg(long)]
    contrast: Option<f32>,
    #[arg(long)]
    threshold: Option<u8>,
    /// Skip the median filter
    #[arg(long)]
    no_denoise: bool,
    #[arg(long)]
    scale: Option<f32>,

    /// Engine language code
    #[arg(long)]
    language: Option<String>,
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,
    /// Minimum word confidence kept in the word list
    #[arg(long)]
    min_confidence: Option<f32>,

    /// Configuration file (defaults to the user config directory)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    SingleLine,
    Document,
}

impl From<ModeArg> for SegmentationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::SingleLine => SegmentationMode::SingleLine,
            ModeArg::Document => SegmentationMode::Document,
        }
    }
}

#[derive(Serialize)]
struct ExtractOutput<'a> {
    #[serde(flatten)]
    result: &'a RecognitionResult,
    pattern_match: Option<TagPatternMatch>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    match cli.command {
        Command::Extract(args) => run_extract(args).await,
        Command::InitConfig { path } => init_config(path),
    }
}

/// Log to stderr so stdout carries only results
fn init_logging(verbose: bool) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    tracing_subscriber::registry()
        .with(log_filter(verbose, rust_log.as_deref()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()?;

    Ok(())
}

/// `RUST_LOG` wins when set and valid; otherwise `--verbose` picks debug over info
fn log_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level.as_str()))
}

async fn run_extract(args: ExtractArgs) -> Result<()> {
    let mut config = load_or_default_config(args.config.as_deref())?;
    apply_overrides(&mut config, &args);

    let surface = PageSurface::open(&args.image)
        .with_context(|| format!("Failed to open page image {:?}", args.image))?;
    let annotation = Annotation::new("cli", args.left, args.top, args.width, args.height).with_angle(args.angle);

    let manager = Arc::new(WorkerManager::new(TesseractFactory::new(config.engine.clone())));
    let matched: Arc<Mutex<Option<TagPatternMatch>>> = Arc::default();

    let orchestrator = OcrOrchestrator::new(RecognitionService::new(manager), |text: &str, confidence: f32, _: &RecognitionResult| {
        info!("Extracted {:?} ({:.1}%)", text, confidence);
    })
    .with_on_error(|message: &str| error!("OCR failed: {}", message))
    .with_on_pattern_match({
        let matched = matched.clone();
        move |found: &TagPatternMatch| {
            info!("Matched pattern {} ({})", found.pattern.id, found.pattern.schedule_table);
            *matched.lock() = Some(found.clone());
        }
    })
    .with_config(&config);

    let outcome = orchestrator
        .process_annotation(Some(&surface), Some(&annotation), None, None)
        .await;
    orchestrator.cleanup().await;
    let result = outcome?;

    let pattern_match = matched.lock().take();
    if args.json {
        let output = ExtractOutput {
            result: &result,
            pattern_match,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_result(&result, pattern_match.as_ref());
    }

    Ok(())
}

fn print_result(result: &RecognitionResult, pattern_match: Option<&TagPatternMatch>) {
    println!("{}", result.text);
    println!("confidence: {:.1}", result.confidence);
    for word in &result.words {
        let b = word.bbox;
        println!(
            "  {:<16} {:>5.1}  [{}, {}, {}, {}]",
            word.text, word.confidence, b.x0, b.y0, b.x1, b.y1
        );
    }
    if let Some(found) = pattern_match {
        println!(
            "pattern: {} -> {} ({:.1})",
            found.pattern.prefix, found.pattern.schedule_table, found.confidence
        );
    }
}

/// Explicit path must load; the default location is optional
fn load_or_default_config(path: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = path {
        let config = config::load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    if let Ok(config_path) = storage::default_config_path() {
        if config_path.exists() {
            let config = config::load_config(&config_path)?;
            info!("Loaded configuration from {:?}", config_path);
            return Ok(config);
        }
    }

    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn apply_overrides(config: &mut AppConfig, args: &ExtractArgs) {
    if let Some(padding) = args.padding {
        config.extraction.padding = padding;
    }
    if let Some(contrast) = args.contrast {
        config.processing.contrast = contrast;
    }
    if let Some(threshold) = args.threshold {
        config.processing.threshold = threshold;
    }
    if args.no_denoise {
        config.processing.denoise = false;
    }
    if let Some(scale) = args.scale {
        config.processing.scale = scale;
    }
    if let Some(language) = &args.language {
        config.recognition.language = language.clone();
    }
    if let Some(mode) = args.mode {
        config.recognition.mode = mode.into();
    }
    if let Some(min_confidence) = args.min_confidence {
        config.recognition.confidence_threshold = min_confidence;
    }
}

fn init_config(path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => storage::default_config_path()?,
    };

    config::save_config(&AppConfig::default(), &path)
        .with_context(|| format!("Failed to write config to {:?}", path))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
