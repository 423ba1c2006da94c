use thiserror::Error;

pub type TagResult<T> = Result<T, TagError>;

#[derive(Error, Debug)]
pub enum TagError {
    #[error("Load timeout: {integration} did not settle within {after_ms}ms")]
    LoadTimeout { integration: String, after_ms: u64 },

    #[error("Load error: {integration}: {reason}")]
    LoadError { integration: String, reason: String },

    #[error("Queue overflow: {integration} re-entered more than {limit} calls during drain")]
    QueueOverflow { integration: String, limit: usize },

    #[error("Tag template error: {0}")]
    Template(String),

    #[error("Descriptor error: {0}")]
    Descriptor(String),

    #[error("Unknown integration: {0}")]
    UnknownIntegration(String),

    #[error("Mapping error: {integration}: {reason}")]
    Mapping { integration: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl TagError {
    /// Whether this error ends an instance's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TagError::LoadTimeout { .. } | TagError::LoadError { .. } | TagError::QueueOverflow { .. }
        )
    }
}

impl From<config::ConfigError> for TagError {
    fn from(err: config::ConfigError) -> Self {
        TagError::Config(err.to_string())
    }
}
