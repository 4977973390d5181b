//! Query pipeline: embed the question, retrieve, deduplicate, compose.
//!
//! User-facing policy: a query never hard-fails once validation passes.
//! Internal errors degrade to a templated fallback answer with no
//! sources; only an empty query is rejected outright. The fallback
//! strings live here, at the topmost caller, so lower layers stay free
//! of presentation text.

use crate::compose::{Answer, AnswerComposer};
use crate::dedupe::dedupe;
use crate::error::{QaError, Result};
use crate::lazy::Lazy;
use docqa_embed::Embedder;
use docqa_index::VectorIndex;
use std::sync::Arc;
use tracing::{error, info};

/// Answer returned when the language model cannot be reached.
pub const MODEL_UNAVAILABLE_ANSWER: &str = "LLM not available. Please check backend logs.";

/// Per-question retrieval-augmented answering over a populated index.
pub struct QueryPipeline {
    embedder: Arc<Lazy<dyn Embedder>>,
    index: VectorIndex,
    composer: AnswerComposer,
    top_k: usize,
    dedupe_prefix_len: usize,
}

impl QueryPipeline {
    pub fn new(
        embedder: Arc<Lazy<dyn Embedder>>,
        index: VectorIndex,
        composer: AnswerComposer,
        top_k: usize,
        dedupe_prefix_len: usize,
    ) -> Self {
        QueryPipeline {
            embedder,
            index,
            composer,
            top_k,
            dedupe_prefix_len,
        }
    }

    /// Answer `query`, degrading internal failures to a fallback
    /// answer. Returns an error only for an empty query.
    pub async fn answer(&self, query: &str) -> Result<Answer> {
        if query.trim().is_empty() {
            return Err(QaError::EmptyQuery);
        }

        info!("Processing query: '{query}'");
        match self.answer_inner(query).await {
            Ok(answer) => {
                info!("Query answered with {} source(s)", answer.sources.len());
                Ok(answer)
            }
            Err(e) => {
                error!("Query failed, returning fallback answer: {e}");
                Ok(fallback_answer(&e))
            }
        }
    }

    /// Embed `query` and fetch its `k` nearest passages. Read-only.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<docqa_index::RetrievalResult>> {
        let embedder = self.embedder.get().await?;
        let query_vector = embedder.embed_one(query).await?;
        Ok(self.index.search(&query_vector, k).await?)
    }

    async fn answer_inner(&self, query: &str) -> Result<Answer> {
        let results = self.retrieve(query, self.top_k).await?;
        let results = dedupe(results, self.dedupe_prefix_len);
        self.composer.compose(query, &results).await
    }
}

fn fallback_answer(error: &QaError) -> Answer {
    let answer = if error.is_model_unavailable() {
        MODEL_UNAVAILABLE_ANSWER.to_string()
    } else {
        format!("An error occurred: {error}. Please try again.")
    };
    Answer {
        answer,
        sources: Vec::new(),
    }
}
