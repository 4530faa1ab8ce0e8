//! Driver core.
//!
//! `DriverCore` wires a backend into the two subsystems: the command
//! worker (with its completion notifier) and the interrupt registry. It
//! is the handle client code enqueues requests and registers listeners
//! through.

use crate::backend_registry::{Backend, BackendRegistry, EventInjector};
use crate::interrupt::{DispatchStats, EventListener, InterruptRegistry};
use crate::notifier::{CallbackQueue, CompletionNotifier};
use crate::queue::RequestQueue;
use crate::request::PendingRequest;
use crate::worker::{CommandWorker, WorkerStats};
use m3io_common::config::{ConfigLoader, DriverConfig, ResumeMode};
use m3io_common::error::DriverError;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Snapshot of both subsystems' counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreStats {
    /// Command worker counters
    pub worker: WorkerStats,
    /// Requests waiting in the queue
    pub queued: usize,
    /// Interrupt dispatch counters
    pub dispatch: DispatchStats,
    /// Buckets (and dispatcher threads) created
    pub buckets: usize,
}

/// Driver core: owns the worker, the callback thread and the registry.
pub struct DriverCore {
    config: DriverConfig,
    worker: Option<CommandWorker>,
    callbacks: Option<Arc<CallbackQueue>>,
    registry: Option<InterruptRegistry>,
    injector: Option<Arc<dyn EventInjector>>,
    running: Arc<AtomicBool>,
}

impl DriverCore {
    /// Create a core for a validated configuration.
    ///
    /// # Errors
    /// Returns `DriverError::ConfigError` if validation fails.
    pub fn new(config: DriverConfig) -> Result<Self, DriverError> {
        config
            .validate()
            .map_err(|e| DriverError::ConfigError(e.to_string()))?;

        info!(
            "DriverCore created: backend={}, {} poll / {} watch clients",
            config.backend,
            config.poll.len(),
            config.watch.len()
        );
        Ok(Self {
            config,
            worker: None,
            callbacks: None,
            registry: None,
            injector: None,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Load the driver configuration from a TOML file.
    pub fn load_config(path: &Path) -> Result<DriverConfig, DriverError> {
        info!("Loading configuration from {:?}", path);
        DriverConfig::load(path)
            .map_err(|e| DriverError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    /// Build the configured backend from `backends` and start on it.
    ///
    /// # Errors
    /// `BackendNotFound` for an unknown backend name, or any error of
    /// [`DriverCore::start`].
    pub fn init(&mut self, backends: &BackendRegistry) -> Result<(), DriverError> {
        info!("Initializing DriverCore with backend '{}'...", self.config.backend);
        let backend = backends.create_backend(&self.config.backend, &self.config)?;
        self.start(backend)
    }

    /// Start the command worker and the interrupt registry on `backend`.
    ///
    /// # Errors
    /// `InitFailed` if the core already runs or a thread cannot be spawned.
    pub fn start(&mut self, backend: Backend) -> Result<(), DriverError> {
        if self.worker.is_some() {
            return Err(DriverError::InitFailed("DriverCore already started".to_string()));
        }

        let (notifier, callbacks) = match self.config.command.resume {
            ResumeMode::Inline => (CompletionNotifier::inline(), None),
            ResumeMode::Callback => {
                let queue = CallbackQueue::start()?;
                (CompletionNotifier::new(queue.clone()), Some(queue))
            }
        };

        let worker = CommandWorker::spawn(backend.transport, notifier)?;
        worker.set_trace_requests(self.config.command.trace_requests);

        self.registry = Some(InterruptRegistry::new(
            backend.interrupts,
            self.config.interrupts,
        ));
        self.worker = Some(worker);
        self.callbacks = callbacks;
        self.injector = backend.injector;
        self.running.store(true, Ordering::SeqCst);

        info!("DriverCore initialized successfully");
        Ok(())
    }

    /// Submit a request to the command worker.
    ///
    /// # Errors
    /// `InvalidArgument` for an unsubmittable request, `Stopped` when the
    /// core is not running.
    pub fn enqueue(&self, request: &Arc<PendingRequest>) -> Result<(), DriverError> {
        self.worker
            .as_ref()
            .ok_or(DriverError::Stopped)?
            .enqueue(request)
    }

    /// Queue feeding the command worker, for clients running on their own
    /// threads. `None` before start and after shutdown.
    pub fn request_queue(&self) -> Option<Arc<RequestQueue>> {
        self.worker.as_ref().map(CommandWorker::queue)
    }

    /// Register a listener for interrupts on (unit, slot, channel).
    ///
    /// # Errors
    /// See [`InterruptRegistry::register`]; `Stopped` when the core is not
    /// running.
    pub fn register(
        &self,
        listener: Arc<dyn EventListener>,
        unit: u8,
        slot: u8,
        channel: u16,
    ) -> Result<(), DriverError> {
        self.registry
            .as_ref()
            .ok_or(DriverError::Stopped)?
            .register(listener, unit, slot, channel)
    }

    /// Toggle the per-request dump.
    pub fn set_trace_requests(&self, enabled: bool) {
        if let Some(worker) = &self.worker {
            worker.set_trace_requests(enabled);
        }
    }

    /// Synthetic event source, when the backend offers one.
    pub fn injector(&self) -> Option<Arc<dyn EventInjector>> {
        self.injector.clone()
    }

    /// Loaded configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Get the running flag for signal handlers.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Current counters.
    pub fn stats(&self) -> CoreStats {
        let mut stats = CoreStats::default();
        if let Some(worker) = &self.worker {
            stats.worker = worker.stats();
            stats.queued = worker.queue().len();
        }
        if let Some(registry) = &self.registry {
            stats.dispatch = registry.stats();
            stats.buckets = registry.bucket_count();
        }
        stats
    }

    /// Stop both subsystems.
    ///
    /// Requests still queued are completed before the worker exits;
    /// pending owner callbacks run before the callback thread exits.
    pub fn shutdown(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Shutdown requested");
        }
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
        if let Some(callbacks) = self.callbacks.take() {
            callbacks.shutdown();
        }
        if let Some(registry) = self.registry.take() {
            registry.shutdown();
        }
        self.injector = None;
    }
}

impl Drop for DriverCore {
    fn drop(&mut self) {
        self.shutdown();
    }
}
