//! Fixity check: recomputes file digests and compares them with the
//! checksums recorded at ingest.

use std::collections::BTreeMap;
use std::io::Read;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::model::{ArchivedObject, ObjectType, PluginState, PluginType};
use crate::plugin::{BatchReport, JobContext, Plugin, PluginCategory, PluginError, PluginParameter};
use crate::retrieval::RetrievedObject;

const SUPPORTED_ALGORITHM: &str = "sha256";
const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Clone)]
pub struct FixityCheckPlugin {
    algorithm: String,
    buffer: Vec<u8>,
}

impl FixityCheckPlugin {
    pub fn new() -> Self {
        Self {
            algorithm: SUPPORTED_ALGORITHM.to_string(),
            buffer: Vec::new(),
        }
    }

    fn digest(&mut self, reader: &mut dyn Read) -> std::io::Result<String> {
        let mut hasher = Sha256::new();
        loop {
            let n = reader.read(&mut self.buffer)?;
            if n == 0 {
                break;
            }
            hasher.update(&self.buffer[..n]);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    fn check(&mut self, object: &RetrievedObject) -> (PluginState, String) {
        let ArchivedObject::File(file) = &object.object else {
            return (
                PluginState::Failure,
                format!("{} is not a file", object.object.object_type()),
            );
        };
        let Some(content) = &object.content else {
            return (PluginState::Failure, "no content available".to_string());
        };

        let computed = match content.open().and_then(|mut r| self.digest(&mut r)) {
            Ok(digest) => digest,
            Err(e) => return (PluginState::Failure, format!("failed to read content: {}", e)),
        };

        match &file.checksum {
            None => (
                PluginState::PartialSuccess,
                format!("no recorded checksum; computed {}:{}", self.algorithm, computed),
            ),
            Some(recorded) if !recorded.algorithm.eq_ignore_ascii_case(&self.algorithm) => (
                PluginState::PartialSuccess,
                format!(
                    "recorded checksum uses {}, cannot verify; computed {}:{}",
                    recorded.algorithm, self.algorithm, computed
                ),
            ),
            Some(recorded) if recorded.value.eq_ignore_ascii_case(&computed) => (
                PluginState::Success,
                format!("{} matches {}", self.algorithm, computed),
            ),
            Some(recorded) => (
                PluginState::Failure,
                format!(
                    "{} mismatch: recorded {}, computed {}",
                    self.algorithm, recorded.value, computed
                ),
            ),
        }
    }
}

impl Default for FixityCheckPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for FixityCheckPlugin {
    fn id(&self) -> &str {
        "fixity-check"
    }

    fn name(&self) -> &str {
        "Fixity check"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Recomputes file digests and compares them with the recorded checksums"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::AipToAip
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::Fixity
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::File
    }

    fn parameters(&self) -> Vec<PluginParameter> {
        vec![PluginParameter::optional(
            "algorithm",
            "Digest algorithm to verify with",
            Some(SUPPORTED_ALGORITHM),
        )]
    }

    fn set_parameters(&mut self, parameters: &BTreeMap<String, String>) -> Result<(), PluginError> {
        if let Some(algorithm) = parameters.get("algorithm") {
            if !algorithm.eq_ignore_ascii_case(SUPPORTED_ALGORITHM) {
                return Err(PluginError::invalid_parameter(
                    "algorithm",
                    format!("unsupported algorithm '{}', only sha256", algorithm),
                ));
            }
            self.algorithm = SUPPORTED_ALGORITHM.to_string();
        }
        Ok(())
    }

    fn init(&mut self) -> Result<(), PluginError> {
        self.buffer = vec![0u8; DEFAULT_BUFFER_SIZE];
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &JobContext,
        objects: &[RetrievedObject],
        report: &mut BatchReport,
    ) -> Result<PluginState, PluginError> {
        if self.buffer.is_empty() {
            self.init()?;
        }
        for object in objects {
            let item = report.start(object.id());
            let (state, details) = self.check(object);
            debug!(job_id = %ctx.job_id, object = object.id(), %state, "fixity checked");
            report.record_item(item.finish(state, details));
        }
        Ok(report.aggregate_state())
    }

    fn shutdown(&mut self) -> Result<(), PluginError> {
        self.buffer = Vec::new();
        Ok(())
    }

    fn clone_me(&self) -> Box<dyn Plugin> {
        Box::new(Self {
            algorithm: self.algorithm.clone(),
            buffer: Vec::new(),
        })
    }
}
