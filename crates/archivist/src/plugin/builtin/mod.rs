//! Preservation actions shipped with the engine.

pub mod fixity;
pub mod format;

pub use fixity::FixityCheckPlugin;
pub use format::FormatIdentificationPlugin;
