//! Error types for the brewdeck engine.

use thiserror::Error;

/// Everything the engine can surface to the UI as a failure.
///
/// Stale responses are deliberately absent: a detail fetch that lost its
/// request identity resolves to `Ok(None)` instead of an error.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The external command could not be started at all.
    #[error("Failed to run brew: {0}")]
    Transport(String),

    /// A well-formed response whose payload carries the error marker.
    #[error("brew reported an error: {0}")]
    Sentinel(String),

    /// Untap refused because installed entities still depend on the repository.
    #[error("Cannot untap {repository}: {} installed item(s) still depend on it", .blockers.len())]
    Blocked {
        repository: String,
        blockers: Vec<String>,
    },

    #[error("Unexpected response shape: {0}")]
    Decode(String),

    #[error("A target name is required for {0}")]
    MissingTarget(&'static str),

    #[error("'{0}' is not a valid name")]
    InvalidName(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A type alias for results produced by the engine.
pub type Result<T> = std::result::Result<T, EngineError>;
