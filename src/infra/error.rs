use thiserror::Error;

use crate::cache::KeyUnavailable;
use crate::config::LoadError;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {0}")]
    Configuration(#[from] LoadError),
    #[error("invalid scenario `{path}`: {source}")]
    Scenario {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid input: {message}")]
    Input { message: String },
    #[error("cache key unavailable: {0}")]
    KeyUnavailable(#[from] KeyUnavailable),
}

impl InfraError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    pub fn scenario(path: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Scenario {
            path: path.into(),
            source,
        }
    }
}
