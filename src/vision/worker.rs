//! Recognition worker lifecycle
//!
//! One engine instance serves every request. The first request spawns it;
//! requests that arrive while that is happening await the same in-flight
//! initialization instead of starting another one.
//!
//! ```text
//! Uninitialized -> Initializing -> Ready
//! Initializing | Ready --cleanup--> Terminated -> Uninitialized
//! ```

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::engine::{EncodedImage, EngineFactory, EngineOutput, EngineParameters, RecognitionEngine};
use super::tesseract::TesseractFactory;
use crate::config::RecognitionConfig;
use crate::error::{OcrError, Result};

/// Observable lifecycle state of the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Initializing,
    Ready,
    Terminated,
}

type InitFuture = Shared<BoxFuture<'static, Result<Arc<EngineWorker>>>>;

enum Slot {
    Uninitialized,
    Initializing { attempt: usize, pending: InitFuture },
    Ready(Arc<EngineWorker>),
    Terminated,
}

struct Inner {
    slot: Slot,
    /// Bumped by every cleanup; waiters from an older generation were torn down
    generation: u64,
}

/// Owner of the shared recognition engine
pub struct WorkerManager {
    factory: Arc<dyn EngineFactory>,
    inner: Mutex<Inner>,
    initializations: AtomicUsize,
}

impl WorkerManager {
    /// Create a manager that spawns engines from `factory`
    pub fn new(factory: impl EngineFactory) -> Self {
        Self::with_factory(Arc::new(factory))
    }

    pub fn with_factory(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            inner: Mutex::new(Inner {
                slot: Slot::Uninitialized,
                generation: 0,
            }),
            initializations: AtomicUsize::new(0),
        }
    }

    /// Process-wide manager backed by the default Tesseract settings
    pub fn global() -> Arc<WorkerManager> {
        static GLOBAL: OnceLock<Arc<WorkerManager>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(WorkerManager::new(TesseractFactory::default())))
            .clone()
    }

    pub fn state(&self) -> WorkerState {
        match self.inner.lock().slot {
            Slot::Uninitialized => WorkerState::Uninitialized,
            Slot::Initializing { .. } => WorkerState::Initializing,
            Slot::Ready(_) => WorkerState::Ready,
            Slot::Terminated => WorkerState::Terminated,
        }
    }

    /// Number of initialization sequences started so far
    pub fn initialization_count(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    /// Get the ready worker, initializing it with `config` if needed
    pub async fn acquire(&self, config: &RecognitionConfig) -> Result<Arc<EngineWorker>> {
        let (attempt, pending, generation) = {
            let mut inner = self.inner.lock();
            let in_flight = match &inner.slot {
                Slot::Ready(worker) => return Ok(worker.clone()),
                Slot::Initializing { attempt, pending } => Some((*attempt, pending.clone())),
                Slot::Uninitialized | Slot::Terminated => None,
            };

            let (attempt, pending) = match in_flight {
                Some(joined) => joined,
                None => {
                    let (attempt, pending) = self.start_initialization(config);
                    inner.slot = Slot::Initializing {
                        attempt,
                        pending: pending.clone(),
                    };
                    (attempt, pending)
                }
            };
            (attempt, pending, inner.generation)
        };

        let outcome = pending.await;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            debug!(attempt, "initialization finished after teardown");
            return Err(OcrError::TeardownInFlight);
        }

        let current = matches!(&inner.slot, Slot::Initializing { attempt: a, .. } if *a == attempt);
        match outcome {
            Ok(worker) => {
                if current {
                    inner.slot = Slot::Ready(worker.clone());
                    info!(attempt, "recognition worker ready");
                }
                Ok(worker)
            }
            Err(err) => {
                if current {
                    inner.slot = Slot::Uninitialized;
                }
                Err(err)
            }
        }
    }

    /// Recognize `image` on the shared worker
    pub async fn recognize(&self, image: &EncodedImage, config: &RecognitionConfig) -> Result<EngineOutput> {
        let worker = self.acquire(config).await?;
        worker.recognize(image, config).await
    }

    /// Terminate the engine and return to `Uninitialized`.
    ///
    /// In-flight requests fail with [`OcrError::TeardownInFlight`]. An
    /// initialization that is still running is awaited and its engine
    /// terminated.
    pub async fn cleanup(&self) {
        let previous = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            std::mem::replace(&mut inner.slot, Slot::Terminated)
        };

        let worker = match previous {
            Slot::Ready(worker) => Some(worker),
            Slot::Initializing { pending, .. } => pending.await.ok(),
            Slot::Uninitialized | Slot::Terminated => None,
        };

        if let Some(worker) = worker {
            worker.shutdown().await;
            info!("recognition worker terminated");
        }

        let mut inner = self.inner.lock();
        if matches!(inner.slot, Slot::Terminated) {
            inner.slot = Slot::Uninitialized;
        }
    }

    fn start_initialization(&self, config: &RecognitionConfig) -> (usize, InitFuture) {
        let attempt = self.initializations.fetch_add(1, Ordering::SeqCst) + 1;
        let factory = self.factory.clone();
        let language = config.language.clone();
        let parameters = EngineParameters::from(config);

        info!(attempt, language = %language, "initializing recognition worker");
        let pending = initialize_worker(factory, language, parameters).boxed().shared();
        (attempt, pending)
    }
}

/// Spawn an engine and bring it to a usable state
async fn initialize_worker(
    factory: Arc<dyn EngineFactory>,
    language: String,
    parameters: EngineParameters,
) -> Result<Arc<EngineWorker>> {
    let mut engine = factory.spawn().await.map_err(|e| {
        error!(error = %format!("{:#}", e), "failed to spawn recognition engine");
        OcrError::WorkerInitialization(format!("{:#}", e))
    })?;

    let setup = async {
        engine.load_language(&language).await?;
        engine.initialize(&language).await?;
        engine.set_parameters(&parameters).await?;
        anyhow::Ok(())
    }
    .await;

    if let Err(e) = setup {
        error!(
            error = %format!("{:#}", e),
            language = %language,
            "failed to configure recognition engine"
        );
        if let Err(term) = engine.terminate().await {
            warn!("failed to terminate half-initialized engine: {:#}", term);
        }
        return Err(OcrError::WorkerInitialization(format!("{:#}", e)));
    }

    debug!(
        language = %language,
        psm = parameters.segmentation_mode.engine_code(),
        "recognition engine configured"
    );
    Ok(Arc::new(EngineWorker::new(engine, language, parameters)))
}

struct Session {
    engine: Box<dyn RecognitionEngine>,
    parameters: EngineParameters,
}

/// A live engine. Calls queue on an async mutex and run one at a time in
/// arrival order.
pub struct EngineWorker {
    session: tokio::sync::Mutex<Session>,
    shutdown: CancellationToken,
    language: String,
}

impl EngineWorker {
    fn new(engine: Box<dyn RecognitionEngine>, language: String, parameters: EngineParameters) -> Self {
        Self {
            session: tokio::sync::Mutex::new(Session { engine, parameters }),
            shutdown: CancellationToken::new(),
            language,
        }
    }

    /// Run one recognition; fails with `TeardownInFlight` if the worker is
    /// shut down before it completes
    pub async fn recognize(&self, image: &EncodedImage, config: &RecognitionConfig) -> Result<EngineOutput> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(OcrError::TeardownInFlight),
            result = self.run(image, config) => result,
        }
    }

    async fn run(&self, image: &EncodedImage, config: &RecognitionConfig) -> Result<EngineOutput> {
        let mut session = self.session.lock().await;

        if config.language != self.language {
            warn!(
                requested = %config.language,
                loaded = %self.language,
                "language differs from the initialized worker; using the loaded language"
            );
        }

        let wanted = EngineParameters::from(config);
        if session.parameters != wanted {
            session.engine.set_parameters(&wanted).await.map_err(|e| {
                error!(error = %format!("{:#}", e), "failed to update engine parameters");
                OcrError::Recognition(format!("{:#}", e))
            })?;
            session.parameters = wanted;
        }

        session.engine.recognize(image).await.map_err(|e| {
            error!(
                error = %format!("{:#}", e),
                width = image.width,
                height = image.height,
                "engine recognition failed"
            );
            OcrError::Recognition(format!("{:#}", e))
        })
    }

    async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut session = self.session.lock().await;
        if let Err(e) = session.engine.terminate().await {
            warn!("engine terminate failed: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelBuffer;
    use crate::config::SegmentationMode;
    use crate::vision::testing::ScriptedFactory;
    use std::time::Duration;

    fn image() -> EncodedImage {
        EncodedImage::encode(PixelBuffer::filled(4, 4, [255, 255, 255, 255]).unwrap()).unwrap()
    }

    #[test]
    fn test_global_manager_is_shared() {
        let first = WorkerManager::global();
        let second = WorkerManager::global();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_first_request_initializes() {
        let factory = ScriptedFactory::default();
        let manager = WorkerManager::new(factory.clone());
        assert_eq!(manager.state(), WorkerState::Uninitialized);

        manager.recognize(&image(), &RecognitionConfig::default()).await.unwrap();

        assert_eq!(manager.state(), WorkerState::Ready);
        assert_eq!(manager.initialization_count(), 1);
        assert_eq!(factory.counters.spawns(), 1);
        assert_eq!(factory.counters.languages_loaded(), vec!["eng".to_string()]);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_is_single_flight() {
        let factory = ScriptedFactory {
            spawn_delay: Duration::from_millis(50),
            ..Default::default()
        };
        let manager = Arc::new(WorkerManager::new(factory.clone()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager.recognize(&image(), &RecognitionConfig::default()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(manager.initialization_count(), 1);
        assert_eq!(factory.counters.spawns(), 1);
        assert_eq!(factory.counters.recognitions(), 8);
        assert_eq!(manager.state(), WorkerState::Ready);
    }

    #[tokio::test]
    async fn test_recognitions_never_overlap() {
        let factory = ScriptedFactory {
            recognize_delay: Duration::from_millis(5),
            ..Default::default()
        };
        let manager = Arc::new(WorkerManager::new(factory.clone()));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.recognize(&image(), &RecognitionConfig::default()).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(factory.counters.max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_failed_initialization_resets_and_retries() {
        let factory = ScriptedFactory::default();
        factory.fail_spawn(true);
        let manager = WorkerManager::new(factory.clone());

        let err = manager.recognize(&image(), &RecognitionConfig::default()).await.unwrap_err();
        assert!(matches!(err, OcrError::WorkerInitialization(_)));
        assert_eq!(manager.state(), WorkerState::Uninitialized);

        factory.fail_spawn(false);
        manager.recognize(&image(), &RecognitionConfig::default()).await.unwrap();
        assert_eq!(manager.state(), WorkerState::Ready);
        assert_eq!(manager.initialization_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_language_fails_initialization() {
        let factory = ScriptedFactory::default();
        let manager = WorkerManager::new(factory.clone());
        let config = RecognitionConfig {
            language: "xyz".to_string(),
            ..Default::default()
        };

        let err = manager.acquire(&config).await.err().unwrap();
        assert!(matches!(err, OcrError::WorkerInitialization(_)));
        assert_eq!(manager.state(), WorkerState::Uninitialized);
        // the half-initialized engine was released
        assert_eq!(factory.counters.terminations(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_resets_and_reinitializes() {
        let factory = ScriptedFactory::default();
        let manager = WorkerManager::new(factory.clone());

        manager.cleanup().await;
        assert_eq!(manager.state(), WorkerState::Uninitialized);

        manager.recognize(&image(), &RecognitionConfig::default()).await.unwrap();
        manager.cleanup().await;
        assert_eq!(manager.state(), WorkerState::Uninitialized);
        assert_eq!(factory.counters.terminations(), 1);

        manager.recognize(&image(), &RecognitionConfig::default()).await.unwrap();
        assert_eq!(manager.initialization_count(), 2);
        assert_eq!(factory.counters.spawns(), 2);
    }

    #[tokio::test]
    async fn test_cleanup_fails_in_flight_recognition() {
        let factory = ScriptedFactory {
            recognize_delay: Duration::from_secs(30),
            ..Default::default()
        };
        let manager = Arc::new(WorkerManager::new(factory.clone()));
        manager.acquire(&RecognitionConfig::default()).await.unwrap();

        let in_flight = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.recognize(&image(), &RecognitionConfig::default()).await })
        };
        while factory.counters.recognitions() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        manager.cleanup().await;

        let result = in_flight.await.unwrap();
        assert_eq!(result.unwrap_err(), OcrError::TeardownInFlight);
        assert_eq!(manager.state(), WorkerState::Uninitialized);
        assert_eq!(factory.counters.terminations(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_during_initialization() {
        let factory = ScriptedFactory {
            spawn_delay: Duration::from_millis(50),
            ..Default::default()
        };
        let manager = Arc::new(WorkerManager::new(factory.clone()));

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.acquire(&RecognitionConfig::default()).await.map(|_| ()) })
        };
        while manager.state() != WorkerState::Initializing {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        manager.cleanup().await;

        assert_eq!(waiter.await.unwrap().unwrap_err(), OcrError::TeardownInFlight);
        assert_eq!(manager.state(), WorkerState::Uninitialized);
        assert_eq!(factory.counters.terminations(), 1);
    }

    #[tokio::test]
    async fn test_changed_parameters_are_reapplied() {
        let factory = ScriptedFactory::default();
        let manager = WorkerManager::new(factory.clone());

        manager.recognize(&image(), &RecognitionConfig::default()).await.unwrap();
        manager.recognize(&image(), &RecognitionConfig::default()).await.unwrap();
        assert_eq!(factory.counters.parameter_updates(), 1);

        let document = RecognitionConfig {
            mode: SegmentationMode::Document,
            ..Default::default()
        };
        manager.recognize(&image(), &document).await.unwrap();
        assert_eq!(factory.counters.parameter_updates(), 2);
        assert_eq!(manager.initialization_count(), 1);
    }

    #[tokio::test]
    async fn test_engine_error_is_recognition_failure() {
        let factory = ScriptedFactory {
            fail_recognize: true,
            ..Default::default()
        };
        let manager = WorkerManager::new(factory);

        let err = manager.recognize(&image(), &RecognitionConfig::default()).await.unwrap_err();
        assert!(matches!(err, OcrError::Recognition(_)));
        // engine errors do not tear the worker down
        assert_eq!(manager.state(), WorkerState::Ready);
    }
}
