//! Error types for the vector index

use crate::store::IndexState;
use std::time::Duration;

/// Result type for vector index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors surfaced at the vector index boundary.
///
/// Transient store failures are retried with bounded backoff inside the
/// index before becoming [`IndexError::Unavailable`], so callers see
/// each variant at most once per operation.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// The search structure has not been published yet; ingest and call
    /// `build_index` first, or wait for an in-flight build.
    #[error("vector index is not ready for search (state: {state})")]
    NotReady { state: IndexState },

    /// The underlying store failed after bounded retries.
    #[error("vector store unavailable: {source}")]
    Unavailable {
        #[source]
        source: sqlx::Error,
    },

    /// A record's embedding does not match the dimension this corpus
    /// was created with.
    #[error("embedding dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// `wait_ready` gave up before the index was published.
    #[error("index build did not become ready within {timeout:?}")]
    BuildTimeout { timeout: Duration },

    /// A stored embedding blob could not be decoded.
    #[error("corrupt record {id}: {message}")]
    CorruptRecord { id: i64, message: String },
}
