use thiserror::Error;

#[derive(Debug, Error)]
pub enum KairosError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid identity: {0}")]
    Identity(String),
}

impl KairosError {
    /// Short error code string returned to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            KairosError::Config(_) => "CONFIG_ERROR",
            KairosError::Serialization(_) => "SERIALIZATION_ERROR",
            KairosError::Io(_) => "IO_ERROR",
            KairosError::Identity(_) => "IDENTITY_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, KairosError>;
