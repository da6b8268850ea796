use std::path::PathBuf;

/// Errors raised by the RELBAR training core.
#[derive(Debug, thiserror::Error)]
pub enum RelbarError {
    /// Invalid configuration value, detected at startup.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The scoring oracle produced no gradient for the distribution parameters,
    /// or its scores vary while its gradient is identically zero.
    #[error("Scoring oracle is not differentiable with respect to its input ({0})")]
    DetachedOracle(&'static str),

    /// A collaborator returned a tensor with an unexpected shape.
    #[error("Shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    Shape {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Problem with the training corpus.
    #[error("Data error: {0}")]
    Data(String),

    /// Failed to save or load a model record.
    #[error("Checkpoint error at {path}: {message}")]
    Checkpoint { path: PathBuf, message: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RelbarError>;
