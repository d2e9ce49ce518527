use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::FaceEngine;
use super::backends::{GeometryEngine, StubEngine};

/// Engine shared between the registry and the analysis thread.
pub type SharedEngine = Arc<Mutex<dyn FaceEngine>>;

/// Thread-safe registry of face engines.
///
/// Engines are wrapped in `Mutex` because `FaceEngine::analyze` takes `&mut self`.
pub struct EngineRegistry {
    engines: HashMap<String, SharedEngine>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            engines: HashMap::new(),
        }
    }

    /// Registry holding every engine shipped with the crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(StubEngine::new());
        registry.register(GeometryEngine::new());
        registry
    }

    /// Register an engine under its own name, replacing any previous one.
    pub fn register<E: FaceEngine + 'static>(&mut self, engine: E) {
        let name = engine.name().to_string();
        self.engines.insert(name, Arc::new(Mutex::new(engine)));
    }

    pub fn get(&self, name: &str) -> Option<SharedEngine> {
        self.engines.get(name).cloned()
    }

    /// Registered engine names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.engines.keys().cloned().collect();
        names.sort();
        names
    }

    /// Look up `name`, warm it up and return it.
    pub fn prepare(&self, name: &str) -> Result<SharedEngine> {
        let engine = self.get(name).ok_or_else(|| {
            anyhow!(
                "engine '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            )
        })?;
        engine
            .lock()
            .map_err(|_| anyhow!("engine lock poisoned"))?
            .warm_up()?;
        Ok(engine)
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_engines_are_listed_and_prepared() -> Result<()> {
        let registry = EngineRegistry::with_builtin();
        assert_eq!(registry.list(), vec!["geometry", "stub"]);
        let engine = registry.prepare("geometry")?;
        assert_eq!(engine.lock().unwrap().name(), "geometry");
        Ok(())
    }

    #[test]
    fn unknown_engine_names_the_alternatives() {
        let registry = EngineRegistry::with_builtin();
        let err = registry.prepare("tflite").err().unwrap();
        assert!(err.to_string().contains("geometry, stub"));
        assert!(registry.get("tflite").is_none());
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = EngineRegistry::new();
        registry.register(StubEngine::new());
        registry.register(StubEngine::new());
        assert_eq!(registry.list(), vec!["stub"]);
    }
}
