//! Ingestion pipeline: document source → chunker → embedder → index.

use crate::error::Result;
use crate::lazy::Lazy;
use crate::source::DocumentSource;
use docqa_chunk::Chunker;
use docqa_embed::Embedder;
use docqa_index::{IndexedRecord, VectorIndex};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Counts reported by a completed ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub records: usize,
}

/// One-shot (or operator-triggered) population of the vector index.
///
/// Failure semantics: a loader failure aborts before any write; once
/// chunking succeeds, embedding plus upsert behave as one logical unit
/// because the batch insert is transactional. Re-running ingestion is
/// additive, so recovery from a failed run is simply re-running it.
pub struct IngestionPipeline {
    chunker: Chunker,
    embedder: Arc<Lazy<dyn Embedder>>,
    index: VectorIndex,
    readiness_poll: Duration,
    readiness_timeout: Duration,
}

impl IngestionPipeline {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<Lazy<dyn Embedder>>,
        index: VectorIndex,
        readiness_poll: Duration,
        readiness_timeout: Duration,
    ) -> Self {
        IngestionPipeline {
            chunker,
            embedder,
            index,
            readiness_poll,
            readiness_timeout,
        }
    }

    /// Load, chunk, embed, and index every document from `source`,
    /// then publish the index and wait until it is searchable.
    pub async fn ingest(&self, source: &dyn DocumentSource) -> Result<IngestReport> {
        info!("Ingesting from {}", source.describe());
        let documents = source.load().await?;

        let mut texts: Vec<String> = Vec::new();
        let mut page_labels: Vec<Option<String>> = Vec::new();
        for document in &documents {
            for chunk in self
                .chunker
                .chunks(&document.text, document.page_label.as_deref())
            {
                texts.push(chunk.text);
                page_labels.push(chunk.page_label);
            }
        }
        info!(
            "Chunked {} document(s) into {} passage(s)",
            documents.len(),
            texts.len()
        );

        let records = if texts.is_empty() {
            0
        } else {
            // Model unavailability is fatal here: nothing can be
            // embedded, so ingestion propagates the error.
            let embedder = self.embedder.get().await?;
            let batch = embedder.embed_many(&texts).await?;

            let records: Vec<IndexedRecord> = batch
                .embeddings
                .into_iter()
                .zip(texts.iter())
                .zip(page_labels.into_iter())
                .map(|((embedding, text), page_label)| IndexedRecord {
                    text: text.clone(),
                    embedding,
                    page_label,
                })
                .collect();
            let inserted = self.index.upsert_batch(&records).await?;
            // Stamp the model after the records land so a failed upsert
            // leaves no metadata behind either.
            self.index
                .record_model(embedder.model_id(), batch.dimension)
                .await?;
            inserted
        };

        // Publish even when nothing was inserted so an empty corpus is
        // still queryable.
        self.index.build_index().await?;
        self.index
            .wait_ready(self.readiness_poll, self.readiness_timeout)
            .await?;

        let report = IngestReport {
            documents: documents.len(),
            chunks: texts.len(),
            records,
        };
        info!(
            "Ingestion complete: {} document(s), {} chunk(s), {} record(s)",
            report.documents, report.chunks, report.records
        );
        Ok(report)
    }
}
