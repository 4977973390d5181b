//! # docqa-index
//!
//! Persistent vector index for the document question-answering
//! pipeline: SQLite-backed storage of (text, embedding, page label)
//! records with exact cosine nearest-neighbor search.
//!
//! ## Readiness
//!
//! The index moves through `Absent -> Building -> Ready`; searching
//! before the index is published fails with [`error::IndexError::NotReady`].
//! [`store::VectorIndex::build_index`] publishes the search structure and
//! is idempotent, and [`store::VectorIndex::wait_ready`] polls readiness
//! at a bounded interval with an overall timeout.
//!
//! ## Search semantics
//!
//! Search is an exact scan: every stored embedding is scored by cosine
//! similarity against the query and results come back in descending
//! score order, ties broken by insertion order.

pub mod error;
pub mod store;

pub use error::{IndexError, Result};
pub use store::{IndexState, IndexStats, IndexedRecord, RetrievalResult, VectorIndex};
