use std::collections::BTreeMap;

use log::{debug, warn};

use super::builtin::{FixityCheckPlugin, FormatIdentificationPlugin};
use super::error::PluginError;
use super::{Plugin, PluginInfo};

/// Prototype instances keyed by plugin id.
pub struct PluginRegistry {
    plugins: BTreeMap<String, Box<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: BTreeMap::new(),
        }
    }

    /// Registry with the plugins shipped in this crate.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(FixityCheckPlugin::new()));
        registry.register(Box::new(FormatIdentificationPlugin::new()));
        registry
    }

    /// Adds a prototype, replacing any plugin with the same id.
    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        let id = plugin.id().to_string();
        if self.plugins.insert(id.clone(), plugin).is_some() {
            warn!("Plugin '{}' registered twice, keeping the latest", id);
        } else {
            debug!("Registered plugin '{}'", id);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.plugins.contains_key(id)
    }

    pub fn info(&self, id: &str) -> Option<PluginInfo> {
        self.plugins.get(id).map(|p| p.info())
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        self.plugins.values().map(|p| p.info()).collect()
    }

    /// Clones the prototype and applies `parameters`, filling declared
    /// defaults and rejecting missing mandatory parameters.
    pub fn instantiate(
        &self,
        id: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<Box<dyn Plugin>, PluginError> {
        let prototype = self
            .plugins
            .get(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;

        let mut effective = parameters.clone();
        for declared in prototype.parameters() {
            if effective.contains_key(&declared.name) {
                continue;
            }
            match (&declared.default_value, declared.mandatory) {
                (Some(default), _) => {
                    effective.insert(declared.name.clone(), default.clone());
                }
                (None, true) => return Err(PluginError::MissingParameter(declared.name)),
                (None, false) => {}
            }
        }

        let mut instance = prototype.clone_me();
        instance.set_parameters(&effective)?;
        Ok(instance)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}
