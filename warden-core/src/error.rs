use std::io;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("invalid config value for {field}: {message}")]
    Invalid { field: String, message: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum WardenError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error at {path:?}: {source}")]
    Io {
        source: io::Error,
        path: Option<PathBuf>,
    },
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("browser error: {0}")]
    Browser(#[from] crate::browser::BrowserError),
    #[error("operation {name} failed: {message}")]
    OperationFailed { name: String, message: String },
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),
    #[error("emergency stop: {reason} (resume at {resume_at})")]
    EmergencyStop {
        reason: String,
        resume_at: DateTime<Utc>,
    },
}

impl WardenError {
    pub fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }
}

impl From<io::Error> for WardenError {
    fn from(source: io::Error) -> Self {
        Self::Io { source, path: None }
    }
}

pub type WardenResult<T> = std::result::Result<T, WardenError>;
