use std::collections::HashMap;
use std::sync::Arc;

use super::CleanerBackend;
use crate::error::{CleanError, Result};

/// Backends keyed by operation name. Built once and injected into the engine.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn CleanerBackend>>,
}

impl BackendRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn CleanerBackend>> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| CleanError::not_found(format!("no backend registered for '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.backends.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    backends: HashMap<String, Arc<dyn CleanerBackend>>,
}

impl RegistryBuilder {
    /// Registers under the backend's own name; a later registration wins.
    pub fn register(self, backend: Arc<dyn CleanerBackend>) -> Self {
        let name = backend.name().to_string();
        self.register_as(name, backend)
    }

    pub fn register_as(mut self, name: impl Into<String>, backend: Arc<dyn CleanerBackend>) -> Self {
        let name = name.into();
        if self.backends.insert(name.clone(), backend).is_some() {
            log::warn!("backend '{}' registered twice; keeping the last one", name);
        }
        self
    }

    pub fn build(self) -> BackendRegistry {
        BackendRegistry {
            backends: self.backends,
        }
    }
}
