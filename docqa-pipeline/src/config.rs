//! Pipeline configuration, loaded from a TOML file with defaults for
//! every field.

use crate::error::{QaError, Result};
use docqa_chunk::ChunkConfig;
use docqa_embed::EmbedConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for the `docqa` pipelines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    /// Logical corpus name; one database can hold several.
    pub corpus: String,
    /// SQLite database file for the vector index.
    pub db_path: PathBuf,
    /// Default document to ingest when the CLI gets no `--source`.
    pub document_path: Option<PathBuf>,
    /// Fixed attribution URL stamped on every source citation.
    pub document_url: String,
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
    /// Nearest neighbours fetched per query.
    pub top_k: usize,
    /// Normalized-prefix length used by the duplicate filter.
    pub dedupe_prefix_len: usize,
    /// Seconds between index readiness polls.
    pub readiness_poll_secs: u64,
    /// Seconds before giving up on index readiness.
    pub readiness_timeout_secs: u64,
    pub embedding: EmbedConfig,
    pub completion: CompletionConfig,
}

impl Default for QaConfig {
    fn default() -> Self {
        QaConfig {
            corpus: "default".to_string(),
            db_path: PathBuf::from("docqa.db"),
            document_path: None,
            document_url: String::new(),
            chunk_size: 400,
            chunk_overlap: 20,
            top_k: 3,
            dedupe_prefix_len: 100,
            readiness_poll_secs: 5,
            readiness_timeout_secs: 120,
            embedding: EmbedConfig::default(),
            completion: CompletionConfig::default(),
        }
    }
}

/// Settings for the language model completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// OpenAI-style chat completions URL.
    pub endpoint: String,
    pub model: String,
    /// Environment variable holding the bearer token. Empty disables
    /// authentication.
    pub api_key_env: String,
    /// Output token budget per completion.
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        CompletionConfig {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "DOCQA_API_KEY".to_string(),
            max_tokens: 150,
            timeout_secs: 30,
        }
    }
}

impl QaConfig {
    /// Read configuration from `path`. A missing file yields defaults
    /// so `docqa` works out of the box.
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            let config = QaConfig::default();
            config.validate()?;
            return Ok(config);
        }
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            QaError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: QaConfig = toml::from_str(&raw).map_err(|e| {
            QaError::config(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Fail fast on invalid settings, before any I/O happens.
    pub fn validate(&self) -> Result<()> {
        if self.corpus.trim().is_empty() {
            return Err(QaError::config("corpus name must not be empty"));
        }
        // Chunk parameters share the chunker's own validation.
        ChunkConfig::new(self.chunk_size, self.chunk_overlap)
            .map_err(|e| QaError::config(e.to_string()))?;
        if self.top_k == 0 {
            return Err(QaError::config("top_k must be at least 1"));
        }
        if self.dedupe_prefix_len == 0 {
            return Err(QaError::config("dedupe_prefix_len must be at least 1"));
        }
        if self.completion.endpoint.trim().is_empty() {
            return Err(QaError::config("completion endpoint must not be empty"));
        }
        self.embedding
            .validate()
            .map_err(|e| QaError::config(e.to_string()))?;
        Ok(())
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        // validate() already proved these parameters are consistent.
        ChunkConfig::new(self.chunk_size, self.chunk_overlap)
            .unwrap_or_default()
    }

    pub fn readiness_poll(&self) -> Duration {
        Duration::from_secs(self.readiness_poll_secs)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }
}
