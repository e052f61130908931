use thiserror::Error;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Missing mandatory parameter '{0}'")]
    MissingParameter(String),

    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Plugin initialization failed: {0}")]
    Init(String),

    #[error("Plugin execution failed: {0}")]
    Execution(String),

    #[error("Plugin panicked: {0}")]
    Panicked(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        PluginError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
