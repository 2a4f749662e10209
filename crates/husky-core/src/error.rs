use thiserror::Error;

/// Errors produced by the husky protocol layer.
#[derive(Debug, Error)]
pub enum HuskyError {
    #[error("invalid sign")]
    InvalidSign,

    #[error("package expired")]
    Expired,

    #[error("too large message: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("unknown message: {0}")]
    UnknownMessage(String),

    #[error("dispatch queue closed")]
    QueueClosed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<base64::DecodeError> for HuskyError {
    fn from(e: base64::DecodeError) -> Self {
        HuskyError::Compression(e.to_string())
    }
}

pub type HuskyResult<T> = Result<T, HuskyError>;
