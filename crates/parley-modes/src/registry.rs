use crate::mode::{CollaborationMode, ModeConfig};
use parley_core::{ParleyError, ParleyResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Builds a mode instance from a validated-later config.
pub type ModeFactory =
    Arc<dyn Fn(&ModeConfig) -> ParleyResult<Arc<dyn CollaborationMode>> + Send + Sync>;

/// Name and description of a registered mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeInfo {
    pub name: String,
    pub description: String,
}

#[derive(Default)]
struct RegistryInner {
    factories: HashMap<String, ModeFactory>,
    instances: HashMap<String, Arc<dyn CollaborationMode>>,
}

/// Explicit registry of collaboration-mode factories.
///
/// Constructed once at startup and handed to the orchestrator; factories are
/// registered through an explicit wiring step, never by module-load side
/// effects, so tests stay hermetic.
#[derive(Default)]
pub struct ModeRegistry {
    inner: RwLock<RegistryInner>,
}

impl ModeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `name`. Duplicate names are an error.
    pub fn register(&self, name: &str, factory: ModeFactory) -> ParleyResult<()> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if inner.factories.contains_key(name) {
            return Err(ParleyError::Mode(format!(
                "mode {} already registered",
                name
            )));
        }
        inner.factories.insert(name.to_string(), factory);
        Ok(())
    }

    /// Creates a fresh instance of `name` and validates it.
    pub fn create(
        &self,
        name: &str,
        config: &ModeConfig,
    ) -> ParleyResult<Arc<dyn CollaborationMode>> {
        let factory = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner
                .factories
                .get(name)
                .cloned()
                .ok_or_else(|| ParleyError::NotFound(format!("mode {}", name)))?
        };
        let mode = factory(config)?;
        mode.validate()
            .map_err(|e| ParleyError::Mode(format!("mode {} validation failed: {}", name, e)))?;
        Ok(mode)
    }

    /// Returns the cached instance of `name`, creating it on first use.
    /// Instances are stateless w.r.t. sessions, so one per name suffices.
    pub fn get_or_create(
        &self,
        name: &str,
        config: &ModeConfig,
    ) -> ParleyResult<Arc<dyn CollaborationMode>> {
        {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if let Some(mode) = inner.instances.get(name) {
                return Ok(mode.clone());
            }
        }
        let mode = self.create(name, config)?;
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .instances
            .entry(name.to_string())
            .or_insert(mode)
            .clone())
    }

    pub fn exists(&self, name: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.factories.contains_key(name)
    }

    /// Lists all registered modes with their descriptions.
    pub fn list_modes(&self) -> Vec<ModeInfo> {
        let names: Vec<String> = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            let mut names: Vec<String> = inner.factories.keys().cloned().collect();
            names.sort();
            names
        };
        names
            .into_iter()
            .filter_map(|name| {
                let mode = self.get_or_create(&name, &ModeConfig::named(&name)).ok()?;
                Some(ModeInfo {
                    name,
                    description: mode.description().to_string(),
                })
            })
            .collect()
    }
}
