//! Capability registry
//!
//! Search engines and completion backends are registered by name when the
//! process starts; stages look them up from here.

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use umbra_core::DEFAULT_SEARCH_ENGINES;
use umbra_tor::TransportManager;

use crate::{OnionSearchEngine, SharedBackend, SharedEngine};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown search engine: {0}")]
    UnknownEngine(String),

    #[error("Unknown completion backend: {0}")]
    UnknownBackend(String),
}

/// Name → capability maps. Names are matched case-insensitively.
#[derive(Default, Clone)]
pub struct CapabilityRegistry {
    engines: BTreeMap<String, SharedEngine>,
    backends: BTreeMap<String, SharedBackend>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in onion engine
    pub fn with_default_engines(transport: Arc<TransportManager>) -> Self {
        let mut registry = Self::new();
        for engine in DEFAULT_SEARCH_ENGINES {
            registry.register_engine(Arc::new(OnionSearchEngine::new(engine, transport.clone())));
        }
        registry
    }

    /// Register an engine, replacing any previous one of the same name
    pub fn register_engine(&mut self, engine: SharedEngine) {
        debug!("Registered search engine {}", engine.name());
        self.engines.insert(engine.name().to_lowercase(), engine);
    }

    pub fn register_backend(&mut self, name: &str, backend: SharedBackend) {
        debug!("Registered completion backend {} ({})", name, backend.model_name());
        self.backends.insert(name.to_lowercase(), backend);
    }

    pub fn engine(&self, name: &str) -> Option<SharedEngine> {
        self.engines.get(&name.to_lowercase()).cloned()
    }

    pub fn backend(&self, name: &str) -> Option<SharedBackend> {
        self.backends.get(&name.to_lowercase()).cloned()
    }

    /// All engines, ordered by name
    pub fn engines(&self) -> Vec<SharedEngine> {
        self.engines.values().cloned().collect()
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    /// Resolve engine names; an empty selection means every registered engine
    pub fn select_engines(&self, names: &[String]) -> Result<Vec<SharedEngine>, RegistryError> {
        if names.is_empty() {
            return Ok(self.engines());
        }
        names
            .iter()
            .map(|n| self.engine(n).ok_or_else(|| RegistryError::UnknownEngine(n.clone())))
            .collect()
    }

    /// Backend by name, or the only registered one when no name is given
    pub fn select_backend(&self, name: Option<&str>) -> Result<Option<SharedBackend>, RegistryError> {
        match name {
            Some(n) => self
                .backend(n)
                .map(Some)
                .ok_or_else(|| RegistryError::UnknownBackend(n.to_string())),
            None => Ok(self.backends.values().next().cloned()),
        }
    }
}
