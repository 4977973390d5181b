//! Configuration for embedding models

use crate::error::{EmbedError, Result};
use fastembed::EmbeddingModel;
use serde::{Deserialize, Serialize};

/// Configuration for an embedding model.
///
/// The model name selects one of the FastEmbed built-in models; the
/// reference deployment uses `nomic-embed-text-v1` (768 dimensions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Name of the embedding model to use.
    pub model_name: String,
    /// Maximum number of texts embedded per inference call.
    pub batch_size: usize,
    /// Whether to L2-normalize embeddings after generation.
    pub normalize: bool,
}

impl EmbedConfig {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    /// Set the inference batch size (builder style).
    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    /// Set whether to normalize embeddings (builder style).
    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    /// Resolve the configured name to a FastEmbed built-in model.
    pub fn embedding_model(&self) -> Result<EmbeddingModel> {
        match self.model_name.as_str() {
            "nomic-embed-text-v1" => Ok(EmbeddingModel::NomicEmbedTextV1),
            "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
            "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
            other => Err(EmbedError::invalid_config(format!(
                "unknown embedding model: {other}"
            ))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be positive"));
        }
        self.embedding_model().map(|_| ())
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model_name: "nomic-embed-text-v1".to_string(),
            batch_size: 16,
            normalize: true,
        }
    }
}
