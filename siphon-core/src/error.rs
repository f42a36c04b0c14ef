use thiserror::Error;

/// Unified error type for Siphon's model and configuration layer.
#[derive(Error, Debug)]
pub enum SiphonError {
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Record too large: {size} bytes exceeds batch limit of {max} bytes")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SiphonError {
    /// Short, stable label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            SiphonError::InvalidRecord(_) => "invalid_record",
            SiphonError::RecordTooLarge { .. } => "too_large",
            SiphonError::ConfigError(_) => "config",
            SiphonError::Io(_) => "io",
            SiphonError::Serde(_) => "serialization",
        }
    }
}
