//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, OnceLock};

/// A batch of embeddings, one per input text.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub embeddings: Vec<Vec<f16>>,
    /// Dimension of each vector, inferred from the first one.
    pub dimension: usize,
}

impl EmbeddingBatch {
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Process-wide cache of initialized models, keyed by configuration, so
/// repeated construction with the same config loads the model once.
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn model_cache() -> &'static Mutex<HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Maps text into the corpus similarity space.
///
/// Both methods are deterministic for a pinned model version and return
/// vectors of a single fixed dimension. Documents at ingestion and
/// queries at retrieval go through the same implementation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text (typically a query).
    async fn embed_one(&self, text: &str) -> Result<Vec<f16>>;

    /// Embed a batch of texts (typically ingestion chunks).
    async fn embed_many(&self, texts: &[String]) -> Result<EmbeddingBatch>;

    /// Dimension of every vector this embedder produces.
    fn dimension(&self) -> usize;

    /// Stable identifier of the backing model, recorded in index metadata.
    fn model_id(&self) -> &str;
}

/// FastEmbed-backed [`Embedder`] running a local ONNX model.
#[derive(Clone)]
pub struct FastEmbedder {
    config: EmbedConfig,
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedder")
            .field("config", &self.config)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedder {
    /// Load (or fetch from the process-wide cache) the configured model.
    ///
    /// This is the expensive step; callers wanting lazy initialization
    /// should hold the construction behind a single-initializer handle.
    /// A load failure is reported as [`EmbedError::ModelUnavailable`].
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        config.validate()?;
        let cache_key = cache_key(&config);

        let cached = {
            let cache = model_cache().lock().expect("model cache lock poisoned");
            cache
                .get(&cache_key)
                .map(|(model, dim)| (Arc::clone(model), *dim))
        };
        if let Some((model, dimension)) = cached {
            tracing::debug!("Reusing cached embedding model: {}", config.model_name);
            return Ok(Self {
                config,
                model,
                dimension,
            });
        }

        tracing::info!("Loading embedding model: {}", config.model_name);
        let embedding_model = config.embedding_model()?;
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                let init_options =
                    InitOptions::new(embedding_model).with_show_download_progress(false);
                let mut model = TextEmbedding::try_new(init_options)
                    .map_err(|e| EmbedError::model_unavailable(format!("{e:#}")))?;

                // Probe the dimension with a throwaway embedding.
                let probe = model
                    .embed(vec!["dimension probe".to_string()], None)
                    .map_err(|e| EmbedError::model_unavailable(format!("{e:#}")))?;
                let dimension = probe.first().map(|e| e.len()).ok_or_else(|| {
                    EmbedError::model_unavailable("model produced no probe embedding")
                })?;
                Ok((model, dimension))
            })
            .await??;
        tracing::info!(
            "Embedding model {} ready, dimension {}",
            config.model_name,
            dimension
        );

        let model = Arc::new(Mutex::new(model));
        {
            let mut cache = model_cache().lock().expect("model cache lock poisoned");
            cache.insert(cache_key, (Arc::clone(&model), dimension));
        }

        Ok(Self {
            config,
            model,
            dimension,
        })
    }

    /// Drop all cached models. Mostly useful in tests and for explicit
    /// operator-triggered resets after a failed initialization.
    pub fn clear_cache() {
        model_cache()
            .lock()
            .expect("model cache lock poisoned")
            .clear();
        tracing::info!("Embedding model cache cleared");
    }

    pub fn cache_size() -> usize {
        model_cache()
            .lock()
            .expect("model cache lock poisoned")
            .len()
    }
}

/// Deterministic cache key over the full serialized config.
fn cache_key(config: &EmbedConfig) -> String {
    let config_json = serde_json::to_string(config).expect("config should always serialize");
    let mut hasher = FnvHasher::default();
    hasher.write(b"v1:");
    hasher.write(config_json.as_bytes());
    format!("v1:{:x}", hasher.finish())
}

/// Convert f32 model output to f16, L2-normalizing when requested so
/// cosine similarity downstream reduces to a dot product.
fn convert_to_f16(embeddings: Vec<Vec<f32>>, normalize: bool) -> Vec<Vec<f16>> {
    embeddings
        .into_iter()
        .map(|embedding| {
            let mut out: Vec<f16> = embedding.into_iter().map(f16::from_f32).collect();
            if normalize {
                let norm: f32 = out
                    .iter()
                    .map(|x| x.to_f32() * x.to_f32())
                    .sum::<f32>()
                    .sqrt();
                if norm > 0.0 {
                    for value in &mut out {
                        *value = f16::from_f32(value.to_f32() / norm);
                    }
                }
            }
            out
        })
        .collect()
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed_one(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let batch = self.embed_many(&texts).await?;
        batch
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::model_unavailable("no embedding generated for text"))
    }

    async fn embed_many(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch::new(vec![]));
        }

        tracing::debug!("Generating embeddings for {} texts", texts.len());
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.config.batch_size) {
            let batch = batch.to_vec();
            let model = Arc::clone(&self.model);

            let raw = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut guard = model.lock().expect("model lock poisoned");
                guard
                    .embed(batch, None)
                    .map_err(|e| EmbedError::Generation { source: e })
            })
            .await??;

            all_embeddings.extend(convert_to_f16(raw, self.config.normalize));
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingBatch::new(all_embeddings))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.config.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_batch() {
        let embeddings = vec![
            vec![f16::from_f32(0.1), f16::from_f32(0.2), f16::from_f32(0.3)],
            vec![f16::from_f32(0.4), f16::from_f32(0.5), f16::from_f32(0.6)],
        ];
        let batch = EmbeddingBatch::new(embeddings);

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.dimension, 3);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_empty_batch_has_zero_dimension() {
        let batch = EmbeddingBatch::new(vec![]);
        assert!(batch.is_empty());
        assert_eq!(batch.dimension, 0);
    }

    #[test]
    fn test_cache_key_is_deterministic_per_config() {
        let a = EmbedConfig::default();
        let b = EmbedConfig::default();
        assert_eq!(cache_key(&a), cache_key(&b));
        assert!(cache_key(&a).starts_with("v1:"));

        let other = EmbedConfig::new("all-minilm-l6-v2");
        assert_ne!(cache_key(&a), cache_key(&other));

        let other_batch = EmbedConfig::default().with_batch_size(99);
        assert_ne!(cache_key(&a), cache_key(&other_batch));
    }

    #[test]
    fn test_convert_to_f16_normalizes() {
        let out = convert_to_f16(vec![vec![3.0, 4.0]], true);
        let norm: f32 = out[0].iter().map(|x| x.to_f32() * x.to_f32()).sum();
        assert!((norm - 1.0).abs() < 1e-2, "norm was {norm}");

        let raw = convert_to_f16(vec![vec![3.0, 4.0]], false);
        assert_eq!(raw[0][0].to_f32(), 3.0);
        assert_eq!(raw[0][1].to_f32(), 4.0);
    }

    #[test]
    fn test_convert_to_f16_leaves_zero_vector_alone() {
        let out = convert_to_f16(vec![vec![0.0, 0.0]], true);
        assert!(out[0].iter().all(|x| x.to_f32() == 0.0));
    }

    #[tokio::test]
    #[ignore] // Downloads a real model. Run with: cargo test -p docqa-embed -- --ignored
    async fn test_real_model_embedding_roundtrip() -> Result<()> {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .try_init()
            .ok();

        let config = EmbedConfig::new("all-minilm-l6-v2");
        let embedder = FastEmbedder::create(config.clone()).await?;
        assert!(embedder.dimension() > 0);

        let one = embedder.embed_one("vector search over documents").await?;
        assert_eq!(one.len(), embedder.dimension());
        assert!(one.iter().all(|x| x.to_f32().is_finite()));

        // Determinism: same input, same vector.
        let again = embedder.embed_one("vector search over documents").await?;
        assert_eq!(one, again);

        let texts = vec![
            "documents are split into chunks".to_string(),
            "chunks are embedded into vectors".to_string(),
        ];
        let batch = embedder.embed_many(&texts).await?;
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.dimension, embedder.dimension());

        // Second construction with the same config reuses the cache.
        let cached = FastEmbedder::create(config).await?;
        assert_eq!(cached.dimension(), embedder.dimension());
        assert!(FastEmbedder::cache_size() >= 1);

        Ok(())
    }
}
