//! Scripted engine for exercising the worker and pipeline without Tesseract

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::engine::{BoundingBox, EncodedImage, EngineFactory, EngineOutput, EngineParameters, EngineWord, RecognitionEngine};

pub(crate) const INSTALLED_LANGUAGES: &[&str] = &["eng", "deu"];

#[derive(Default)]
pub(crate) struct Counters {
    spawns: AtomicUsize,
    terminations: AtomicUsize,
    recognitions: AtomicUsize,
    parameter_updates: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    languages: Mutex<Vec<String>>,
}

impl Counters {
    pub(crate) fn spawns(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub(crate) fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    pub(crate) fn recognitions(&self) -> usize {
        self.recognitions.load(Ordering::SeqCst)
    }

    pub(crate) fn parameter_updates(&self) -> usize {
        self.parameter_updates.load(Ordering::SeqCst)
    }

    pub(crate) fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub(crate) fn languages_loaded(&self) -> Vec<String> {
        self.languages.lock().clone()
    }
}

/// Factory whose engines return a fixed output
#[derive(Clone)]
pub(crate) struct ScriptedFactory {
    pub(crate) counters: Arc<Counters>,
    pub(crate) output: EngineOutput,
    pub(crate) spawn_delay: Duration,
    pub(crate) recognize_delay: Duration,
    pub(crate) fail_recognize: bool,
    pub(crate) spawn_fails: Arc<AtomicBool>,
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self {
            counters: Arc::default(),
            output: scripted_output("D-101", 91.0, &[("D-101", 91.0)]),
            spawn_delay: Duration::ZERO,
            recognize_delay: Duration::ZERO,
            fail_recognize: false,
            spawn_fails: Arc::default(),
        }
    }
}

impl ScriptedFactory {
    pub(crate) fn with_output(output: EngineOutput) -> Self {
        Self {
            output,
            ..Default::default()
        }
    }

    pub(crate) fn fail_spawn(&self, fail: bool) {
        self.spawn_fails.store(fail, Ordering::SeqCst);
    }
}

/// Engine output with one word per entry, laid out left to right
pub(crate) fn scripted_output(text: &str, confidence: f32, words: &[(&str, f32)]) -> EngineOutput {
    let words = words
        .iter()
        .enumerate()
        .map(|(i, (text, confidence))| {
            let x0 = i as u32 * 50 + 5;
            EngineWord {
                text: text.to_string(),
                confidence: *confidence,
                bbox: BoundingBox {
                    x0,
                    y0: 5,
                    x1: x0 + 40,
                    y1: 19,
                },
            }
        })
        .collect();

    EngineOutput {
        text: text.to_string(),
        confidence,
        words,
    }
}

#[async_trait]
impl EngineFactory for ScriptedFactory {
    async fn spawn(&self) -> anyhow::Result<Box<dyn RecognitionEngine>> {
        if !self.spawn_delay.is_zero() {
            tokio::time::sleep(self.spawn_delay).await;
        }
        if self.spawn_fails.load(Ordering::SeqCst) {
            anyhow::bail!("scripted spawn failure");
        }
        self.counters.spawns.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine { factory: self.clone() }))
    }
}

struct ScriptedEngine {
    factory: ScriptedFactory,
}

#[async_trait]
impl RecognitionEngine for ScriptedEngine {
    async fn load_language(&mut self, language: &str) -> anyhow::Result<()> {
        if !INSTALLED_LANGUAGES.contains(&language) {
            anyhow::bail!("language '{}' is not installed", language);
        }
        self.factory.counters.languages.lock().push(language.to_string());
        Ok(())
    }

    async fn initialize(&mut self, _language: &str) -> anyhow::Result<()> {
        Ok(())
    }

    async fn set_parameters(&mut self, _parameters: &EngineParameters) -> anyhow::Result<()> {
        self.factory.counters.parameter_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn recognize(&mut self, _image: &EncodedImage) -> anyhow::Result<EngineOutput> {
        let counters = &self.factory.counters;
        counters.recognitions.fetch_add(1, Ordering::SeqCst);

        let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_active.fetch_max(active, Ordering::SeqCst);
        if !self.factory.recognize_delay.is_zero() {
            tokio::time::sleep(self.factory.recognize_delay).await;
        }
        counters.active.fetch_sub(1, Ordering::SeqCst);

        if self.factory.fail_recognize {
            anyhow::bail!("scripted recognition failure");
        }
        Ok(self.factory.output.clone())
    }

    async fn terminate(&mut self) -> anyhow::Result<()> {
        self.factory.counters.terminations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
