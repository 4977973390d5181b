//! # docqa-embed
//!
//! Text embedding for the document question-answering pipeline, backed
//! by local ONNX models via FastEmbed.
//!
//! The crate exposes one seam, the [`Embedder`] trait, with two methods:
//! [`Embedder::embed_one`] for queries and [`Embedder::embed_many`] for
//! ingestion batches. Both are deterministic for a pinned model and
//! produce vectors of a single, model-wide dimension. The concrete
//! adapter is [`FastEmbedder`]; alternate back-ends can be substituted
//! through the trait.
//!
//! Model initialization is expensive, so loaded models live in a
//! process-wide cache keyed by configuration: creating a second
//! [`FastEmbedder`] with the same [`EmbedConfig`] reuses the already
//! loaded model. Initialization failure surfaces as
//! [`EmbedError::ModelUnavailable`] and callers should treat it as
//! non-retryable within the process unless they explicitly reset.
//!
//! Embeddings are stored as half-precision (f16) vectors, L2-normalized
//! on conversion, so cosine similarity reduces to a dot product
//! downstream.

pub mod config;
pub mod error;
pub mod provider;

pub use config::EmbedConfig;
pub use error::{EmbedError, Result};
pub use provider::{Embedder, EmbeddingBatch, FastEmbedder};
