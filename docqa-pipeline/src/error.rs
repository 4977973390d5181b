//! Error types for the document QA pipelines.

use docqa_chunk::ChunkError;
use docqa_embed::EmbedError;
use docqa_index::IndexError;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by ingestion and query orchestration.
///
/// Query-time callers rarely see these directly: the query pipeline
/// converts everything except [`QaError::EmptyQuery`] into a fallback
/// answer. Ingestion propagates them as-is since it is an
/// operator-triggered maintenance action.
#[derive(Error, Debug)]
pub enum QaError {
    /// Invalid configuration, caught before any I/O.
    #[error("invalid configuration: {message}")]
    Config { message: String },

    /// The query string was empty or all whitespace.
    #[error("query text must not be empty")]
    EmptyQuery,

    /// A document source failed to load or parse.
    #[error("document load failed: {message}")]
    Loader { message: String },

    /// The language model endpoint could not be reached or initialized.
    #[error("language model unavailable: {message}")]
    ModelUnavailable { message: String },

    /// The language model responded, but not with a usable completion.
    #[error("completion failed: {message}")]
    Completion { message: String },

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Embed(#[from] EmbedError),

    #[error(transparent)]
    Index(#[from] IndexError),

    /// A cached initialization failure replayed from a shared slot.
    #[error(transparent)]
    Shared(#[from] Arc<QaError>),
}

impl QaError {
    pub fn config(message: impl Into<String>) -> Self {
        QaError::Config {
            message: message.into(),
        }
    }

    pub fn loader(message: impl Into<String>) -> Self {
        QaError::Loader {
            message: message.into(),
        }
    }

    pub fn model_unavailable(message: impl Into<String>) -> Self {
        QaError::ModelUnavailable {
            message: message.into(),
        }
    }

    pub fn completion(message: impl Into<String>) -> Self {
        QaError::Completion {
            message: message.into(),
        }
    }

    /// True when the root cause is an unavailable model (embedding or
    /// language model), which gets a dedicated user-facing fallback.
    pub fn is_model_unavailable(&self) -> bool {
        match self {
            QaError::ModelUnavailable { .. } => true,
            QaError::Embed(EmbedError::ModelUnavailable { .. }) => true,
            QaError::Shared(inner) => inner.is_model_unavailable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, QaError>;
