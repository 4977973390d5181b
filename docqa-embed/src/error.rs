//! Error types for the embedding system

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type covering configuration, initialization, and generation
/// failures in the embedding layer.
///
/// `ModelUnavailable` is the one callers branch on: the query path
/// degrades on it, the ingestion path treats it as fatal.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The embedding model could not be initialized or has stopped
    /// responding. Not retryable within the same process lifetime
    /// unless the caller explicitly resets.
    #[error("embedding model unavailable: {message}")]
    ModelUnavailable { message: String },

    /// The embedding configuration is invalid (unknown model name,
    /// bad batch size).
    #[error("invalid embedding configuration: {message}")]
    InvalidConfig { message: String },

    /// Embedding generation failed for an otherwise healthy model.
    #[error("embedding generation failed: {source}")]
    Generation {
        #[from]
        source: anyhow::Error,
    },

    /// A blocking inference task failed to join.
    #[error("embedding task failed: {source}")]
    Task {
        #[from]
        source: tokio::task::JoinError,
    },
}

impl EmbedError {
    pub fn model_unavailable(message: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
