//! Format identification by file name and, failing that, magic bytes.

use std::collections::BTreeMap;
use std::io::Read;

use tracing::debug;

use crate::model::{ArchivedObject, ObjectType, PluginState, PluginType};
use crate::plugin::{BatchReport, JobContext, Plugin, PluginCategory, PluginError, PluginParameter};
use crate::retrieval::RetrievedObject;

const SNIFF_LEN: usize = 16;

const SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF", "application/pdf"),
    (b"\x89PNG\r\n\x1a\n", "image/png"),
    (b"\xFF\xD8\xFF", "image/jpeg"),
    (b"GIF8", "image/gif"),
    (b"PK\x03\x04", "application/zip"),
    (b"II*\x00", "image/tiff"),
    (b"MM\x00*", "image/tiff"),
];

#[derive(Clone)]
pub struct FormatIdentificationPlugin {
    sniff_content: bool,
}

impl FormatIdentificationPlugin {
    pub fn new() -> Self {
        Self {
            sniff_content: true,
        }
    }

    fn identify(&self, object: &RetrievedObject) -> (PluginState, String) {
        let ArchivedObject::File(file) = &object.object else {
            return (
                PluginState::Failure,
                format!("{} is not a file", object.object.object_type()),
            );
        };

        if let Some(mime) = mime_guess::from_path(&file.name).first() {
            return (
                PluginState::Success,
                format!("{} (by extension)", mime.essence_str()),
            );
        }

        if !self.sniff_content {
            return (
                PluginState::PartialSuccess,
                "unknown format, content sniffing disabled".to_string(),
            );
        }

        let Some(content) = &object.content else {
            return (
                PluginState::PartialSuccess,
                "unknown format, no content to inspect".to_string(),
            );
        };

        let mut head = Vec::with_capacity(SNIFF_LEN);
        let read = content
            .open()
            .and_then(|r| r.take(SNIFF_LEN as u64).read_to_end(&mut head));
        if let Err(e) = read {
            return (PluginState::Failure, format!("failed to read content: {}", e));
        }

        match sniff(&head) {
            Some(mime) => (PluginState::Success, format!("{} (by signature)", mime)),
            None => (PluginState::PartialSuccess, "unknown format".to_string()),
        }
    }
}

impl Default for FormatIdentificationPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn sniff(head: &[u8]) -> Option<&'static str> {
    SIGNATURES
        .iter()
        .find(|(magic, _)| head.starts_with(magic))
        .map(|(_, mime)| *mime)
}

impl Plugin for FormatIdentificationPlugin {
    fn id(&self) -> &str {
        "format-identification"
    }

    fn name(&self) -> &str {
        "Format identification"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Identifies the media type of files"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::AipToAip
    }

    fn category(&self) -> PluginCategory {
        PluginCategory::Characterization
    }

    fn object_type(&self) -> ObjectType {
        ObjectType::File
    }

    fn parameters(&self) -> Vec<PluginParameter> {
        vec![PluginParameter::optional(
            "sniff_content",
            "Inspect leading bytes when the extension is not conclusive",
            Some("true"),
        )]
    }

    fn set_parameters(&mut self, parameters: &BTreeMap<String, String>) -> Result<(), PluginError> {
        if let Some(value) = parameters.get("sniff_content") {
            self.sniff_content = value.parse::<bool>().map_err(|_| {
                PluginError::invalid_parameter("sniff_content", format!("expected true or false, got '{}'", value))
            })?;
        }
        Ok(())
    }

    fn execute(
        &mut self,
        ctx: &JobContext,
        objects: &[RetrievedObject],
        report: &mut BatchReport,
    ) -> Result<PluginState, PluginError> {
        for object in objects {
            let (state, details) = self.identify(object);
            debug!(job_id = %ctx.job_id, object = object.id(), %details, "format identified");
            report.record(object.id(), state, details);
        }
        Ok(report.aggregate_state())
    }

    fn clone_me(&self) -> Box<dyn Plugin> {
        Box::new(self.clone())
    }
}
