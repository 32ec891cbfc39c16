/// Error types for device control operations
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Template error: {0}")]
    Template(String),

    #[error("Command `{0}` not found in config")]
    MissingCommand(String),

    #[error("Unresolved placeholder {{{placeholder}}} in `{token}`")]
    UnresolvedPlaceholder { placeholder: String, token: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Command timeout: {0}")]
    Timeout(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Resource unavailable: {0}")]
    Unavailable(String),

    #[error("Interactive channel closed")]
    ChannelClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ControlError>;
