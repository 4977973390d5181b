//! Retrieval-augmented question answering over ingested documents.
//!
//! Two orchestrations over shared collaborators:
//!
//! - [`IngestionPipeline`]: document source → chunker → embedder →
//!   vector index, run ahead of time by an operator.
//! - [`QueryPipeline`]: embedder → retrieval → dedupe → answer
//!   composition, run per user question against the populated index.
//!
//! Heavy dependencies (embedding model, language model client) sit
//! behind [`Lazy`] slots so they initialize once on first use and cache
//! failures instead of retrying per request.

pub mod compose;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod ingest;
pub mod lazy;
pub mod llm;
pub mod query;
pub mod source;

pub use compose::{Answer, AnswerComposer, SourceCitation};
pub use config::{CompletionConfig, QaConfig};
pub use dedupe::dedupe;
pub use error::{QaError, Result};
pub use ingest::{IngestReport, IngestionPipeline};
pub use lazy::Lazy;
pub use llm::{CompletionClient, HttpCompletionClient};
pub use query::{MODEL_UNAVAILABLE_ANSWER, QueryPipeline};
pub use source::{Document, DocumentSource, StaticSource, TextFileSource};
