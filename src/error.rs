use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbedcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),
}

/// Failures talking to the embedding backend
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    #[error("Transport error during {operation}: {details}")]
    Transport { operation: String, details: String },

    #[error("HTTP {status} during {operation}: {detail}")]
    Http {
        operation: String,
        status: u16,
        detail: String,
    },

    #[error("Invalid response for {operation}: {details}")]
    Decode { operation: String, details: String },
}

impl BackendError {
    /// Message suitable for the operator: the server's `detail` when it sent one
    pub fn user_message(&self) -> Option<&str> {
        match self {
            BackendError::Http { detail, .. } if !detail.is_empty() => Some(detail),
            _ => None,
        }
    }
}

/// Rejections raised before any remote call is made
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No camera selected")]
    NoCameraSelected,

    #[error("Camera {camera_id} is not in the camera directory")]
    UnknownCamera { camera_id: u64 },

    #[error("Camera {camera_id} is already collecting")]
    AlreadyCollecting { camera_id: u64 },

    #[error("Another operation is still in progress")]
    Busy,

    #[error("Session has been closed")]
    Disposed,
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, EmbedcamError>;
