use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide error.
///
/// Payloads are owned strings so that one population result can be handed to
/// every waiter of a single-flight computation.
#[derive(Debug, Clone, Error)]
pub enum KuraError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String },

    #[error("Cache backend unavailable: {message}")]
    TransientStore { message: String },

    #[error("Cache error: {message}")]
    Store { message: String },

    #[error("Analysis error: {message}")]
    Analysis { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Server error ({code}): {message}")]
    Remote { code: String, message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Artifact {digest} is not cached on the server")]
    MissingBlob { digest: String },

    #[error("Vulnerability database error: {message}")]
    Database { message: String },

    #[error("IO error on {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl KuraError {
    pub fn config(message: impl Into<String>) -> Self {
        KuraError::Config {
            message: message.into(),
        }
    }

    pub fn analysis(message: impl Into<String>) -> Self {
        KuraError::Analysis {
            message: message.into(),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        KuraError::Database {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        KuraError::Store {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        KuraError::Io {
            path: path.into(),
            message: source.to_string(),
        }
    }

    /// Connectivity failures of a remote store. Reads treat these as a miss.
    pub fn is_transient(&self) -> bool {
        matches!(self, KuraError::TransientStore { .. })
    }
}

impl From<serde_json::Error> for KuraError {
    fn from(e: serde_json::Error) -> Self {
        KuraError::Serialization {
            message: e.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, KuraError>;
