//! The plugin contract every preservation action implements.

pub mod builtin;
pub mod error;
pub mod registry;
pub mod report;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{ObjectType, PluginState, PluginType};
use crate::retrieval::RetrievedObject;

pub use error::PluginError;
pub use registry::PluginRegistry;
pub use report::BatchReport;

/// What kind of preservation action a plugin performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginCategory {
    Characterization,
    Validation,
    Conversion,
    Fixity,
    Misc,
}

/// A parameter a plugin understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginParameter {
    pub name: String,
    pub description: String,
    pub mandatory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl PluginParameter {
    pub fn optional(name: &str, description: &str, default_value: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            mandatory: false,
            default_value: default_value.map(str::to_string),
        }
    }

    pub fn mandatory(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            mandatory: true,
            default_value: None,
        }
    }
}

/// Descriptive metadata of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub plugin_type: PluginType,
    pub category: PluginCategory,
    pub object_type: ObjectType,
    pub parameters: Vec<PluginParameter>,
}

/// Job-level values shared with every plugin call.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    pub job_id: String,
    pub job_name: String,
    pub username: String,
    pub parameters: BTreeMap<String, String>,
}

/// Lifecycle of a pluggable preservation action.
///
/// Each worker holds its own instance obtained through [`Plugin::clone_me`],
/// so `execute` is never called concurrently on one instance. The job-level
/// hooks `before_all_execute` and `after_all_execute` run exactly once per
/// job, on an instance that executes no batches.
pub trait Plugin: Send + Sync {
    /// Stable identifier jobs refer to.
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn plugin_type(&self) -> PluginType;

    fn category(&self) -> PluginCategory;

    /// The single object type this plugin accepts.
    fn object_type(&self) -> ObjectType;

    fn parameters(&self) -> Vec<PluginParameter> {
        Vec::new()
    }

    /// Applies job parameters. Rejections are configuration errors.
    fn set_parameters(&mut self, _parameters: &BTreeMap<String, String>) -> Result<(), PluginError> {
        Ok(())
    }

    /// Acquires expensive resources, once per worker instance.
    fn init(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    fn before_all_execute(&mut self, _ctx: &JobContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Processes one batch, recording one outcome per object into `report`.
    ///
    /// Outcomes recorded before an error or panic are kept.
    fn execute(
        &mut self,
        ctx: &JobContext,
        objects: &[RetrievedObject],
        report: &mut BatchReport,
    ) -> Result<PluginState, PluginError>;

    fn after_all_execute(&mut self, _ctx: &JobContext) -> Result<(), PluginError> {
        Ok(())
    }

    /// Releases resources. Errors are logged, never escalated.
    fn shutdown(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    /// An independent instance with the same configuration.
    fn clone_me(&self) -> Box<dyn Plugin>;

    fn info(&self) -> PluginInfo {
        PluginInfo {
            id: self.id().to_string(),
            name: self.name().to_string(),
            version: self.version().to_string(),
            description: self.description().to_string(),
            plugin_type: self.plugin_type(),
            category: self.category(),
            object_type: self.object_type(),
            parameters: self.parameters(),
        }
    }
}
