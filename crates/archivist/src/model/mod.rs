//! Durable entities: jobs, reports and the archived objects they target.

pub mod job;
pub mod object;
pub mod report;

pub use job::{InvalidTransition, Job, JobState, JobStats, PluginType, SelectedObjects};
pub use object::{
    Aip, ArchivedFile, ArchivedObject, Checksum, ObjectType, Representation, TransferredResource,
};
pub use report::{PluginState, Report, ReportItem};
