//! Error types for Mindscan

/// Result type alias using Mindscan's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Mindscan operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Tokenizer loading or encoding errors
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// Transformer encoder / recurrent layer errors
    #[error("encoder error: {0}")]
    Encoder(String),

    /// Tree ensemble loading or scoring errors
    #[error("tree model error: {0}")]
    TreeModel(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new tokenizer error
    pub fn tokenizer(msg: impl Into<String>) -> Self {
        Self::Tokenizer(msg.into())
    }

    /// Create a new encoder error
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder(msg.into())
    }

    /// Create a new tree model error
    pub fn tree_model(msg: impl Into<String>) -> Self {
        Self::TreeModel(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
