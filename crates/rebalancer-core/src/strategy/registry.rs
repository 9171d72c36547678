//! Name-to-strategy lookup table
//!
//! Lifecycle rule: registration happens once at process startup, before any
//! audit cycle runs; resolution is read-only and safe to perform from many
//! tasks concurrently. Registering during the operational phase is not
//! expected, but the lock makes it safe regardless.

use super::Strategy;
use crate::error::EngineError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Registry of available strategies.
#[derive(Default)]
pub struct StrategyRegistry {
    inner: RwLock<HashMap<String, Arc<dyn Strategy>>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a strategy under its own name. Fails if the name is taken.
    pub fn register(&self, strategy: Arc<dyn Strategy>) -> Result<(), EngineError> {
        let name = strategy.name().to_string();
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.contains_key(&name) {
            return Err(EngineError::DuplicateName(name));
        }
        info!(strategy = %name, goal = strategy.goal(), "Strategy registered");
        inner.insert(name, strategy);
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Strategy>, EngineError> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(name.to_string()))
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read().expect("registry lock poisoned");
        let mut names: Vec<String> = inner.keys().cloned().collect();
        names.sort();
        names
    }
}
