//! Backend registry.
//!
//! A backend bundles the command transport and the interrupt controller
//! the core runs on. `BackendRegistry` maps backend names to factories and
//! is handed to `DriverCore` by value, so tests can inject their own.

use m3io_common::config::DriverConfig;
use m3io_common::error::DriverError;
use m3io_common::event::IoAddress;
use m3io_common::transport::{CommandTransport, InterruptController};
use std::collections::HashMap;
use std::sync::Arc;

/// Source of synthetic interrupts, offered by simulated backends.
pub trait EventInjector: Send + Sync {
    /// Addresses whose interrupts are currently enabled.
    fn enabled(&self) -> Vec<IoAddress>;

    /// Deliver one event for `address` to every queue it is enabled on.
    /// Returns the number of queues the event was delivered to.
    fn raise(&self, address: IoAddress) -> Result<usize, DriverError>;
}

/// Resources a backend provides to the core.
pub struct Backend {
    /// Command channel, moved into the command worker
    pub transport: Box<dyn CommandTransport>,
    /// Interrupt queue and enable primitives
    pub interrupts: Arc<dyn InterruptController>,
    /// Synthetic event source (simulated backends only)
    pub injector: Option<Arc<dyn EventInjector>>,
}

/// Factory building a backend from the driver configuration.
pub type BackendFactory = fn(&DriverConfig) -> Result<Backend, DriverError>;

/// Registry of available backends.
pub struct BackendRegistry {
    factories: HashMap<&'static str, BackendFactory>,
}

impl BackendRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry holding every built-in backend.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::drivers::register_all_backends(&mut registry);
        registry
    }

    /// Register a backend factory.
    ///
    /// # Panics
    /// Panics if a backend with the same name is already registered.
    pub fn register(&mut self, name: &'static str, factory: BackendFactory) {
        if self.factories.contains_key(name) {
            panic!("Backend '{name}' is already registered");
        }
        self.factories.insert(name, factory);
    }

    /// Get a backend factory by name.
    pub fn get_factory(&self, name: &str) -> Option<BackendFactory> {
        self.factories.get(name).copied()
    }

    /// Build a backend by name.
    ///
    /// # Errors
    /// Returns `DriverError::BackendNotFound` if no backend with the given
    /// name is registered, or the factory's own error.
    pub fn create_backend(&self, name: &str, config: &DriverConfig) -> Result<Backend, DriverError> {
        let factory = self
            .get_factory(name)
            .ok_or_else(|| DriverError::BackendNotFound(name.to_string()))?;
        factory(config)
    }

    /// List all registered backend names.
    pub fn list_backends(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
