//! Error types for the transfer library.

use thiserror::Error;

/// Main error type for transfer operations.
#[derive(Error, Debug)]
pub enum HaulError {
    /// Configuration error (invalid YAML, inconsistent chunk-size/mode, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source discovery or listing failure
    #[error("Scan failed for {path}: {message}")]
    Scan { path: String, message: String },

    /// Chunk or object upload failure for a specific destination key
    #[error("Transfer failed for {key}: {message}")]
    Transfer { key: String, message: String },

    /// Multipart session begin/complete/abort failure
    #[error("Session {session} error: {message}")]
    Session { session: String, message: String },

    /// IO error (file operations, local source reads)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HaulError {
    /// Create a Scan error.
    pub fn scan(path: impl Into<String>, message: impl Into<String>) -> Self {
        HaulError::Scan {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a Transfer error.
    pub fn transfer(key: impl Into<String>, message: impl Into<String>) -> Self {
        HaulError::Transfer {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a Session error.
    pub fn session(session: impl Into<String>, message: impl Into<String>) -> Self {
        HaulError::Session {
            session: session.into(),
            message: message.into(),
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, HaulError>;
