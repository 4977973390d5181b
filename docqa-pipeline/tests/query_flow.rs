//! End-to-end pipeline scenarios with in-memory storage and local
//! stand-ins for the embedding and language models.

use async_trait::async_trait;
use docqa_chunk::{ChunkConfig, Chunker};
use docqa_embed::{Embedder, EmbeddingBatch};
use docqa_index::VectorIndex;
use docqa_pipeline::{
    AnswerComposer, CompletionClient, IngestionPipeline, Lazy, MODEL_UNAVAILABLE_ANSWER, QaError,
    QueryPipeline, Result, TextFileSource,
};
use half::f16;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Deterministic 3-dimensional "embedding": letter frequencies of a/e/t.
/// Texts sharing vocabulary land close together, which is all cosine
/// ranking needs.
struct LetterFrequencyEmbedder {
    calls: AtomicUsize,
}

impl LetterFrequencyEmbedder {
    fn new() -> Arc<Self> {
        Arc::new(LetterFrequencyEmbedder {
            calls: AtomicUsize::new(0),
        })
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(text: &str) -> Vec<f16> {
        let lower = text.to_lowercase();
        let count = |c: char| lower.chars().filter(|&x| x == c).count() as f32 + 1.0;
        [count('a'), count('e'), count('t')]
            .iter()
            .map(|&v| f16::from_f32(v))
            .collect()
    }
}

#[async_trait]
impl Embedder for LetterFrequencyEmbedder {
    async fn embed_one(&self, text: &str) -> docqa_embed::Result<Vec<f16>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::vector(text))
    }

    async fn embed_many(&self, texts: &[String]) -> docqa_embed::Result<EmbeddingBatch> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(EmbeddingBatch::new(
            texts.iter().map(|t| Self::vector(t)).collect(),
        ))
    }

    fn dimension(&self) -> usize {
        3
    }

    fn model_id(&self) -> &str {
        "letter-frequency-test"
    }
}

/// Replays a canned completion and records every prompt it saw.
struct CannedCompletion {
    reply: String,
    prompts: Mutex<Vec<String>>,
}

impl CannedCompletion {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(CannedCompletion {
            reply: reply.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CompletionClient for CannedCompletion {
    async fn complete(&self, prompt: &str, _max_tokens: u32) -> Result<String> {
        self.prompts.lock().expect("lock").push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

struct UnavailableCompletion;

#[async_trait]
impl CompletionClient for UnavailableCompletion {
    async fn complete(&self, _prompt: &str, _max_tokens: u32) -> Result<String> {
        Err(QaError::model_unavailable("connection refused"))
    }
}

fn embedder_slot(embedder: Arc<LetterFrequencyEmbedder>) -> Arc<Lazy<dyn Embedder>> {
    Arc::new(Lazy::ready(embedder as Arc<dyn Embedder>))
}

fn composer(client: Arc<dyn CompletionClient>) -> AnswerComposer {
    AnswerComposer::new(
        Arc::new(Lazy::ready(client)),
        150,
        "https://example.com/report.pdf",
    )
}

fn query_pipeline(
    embedder: Arc<LetterFrequencyEmbedder>,
    index: VectorIndex,
    client: Arc<dyn CompletionClient>,
) -> QueryPipeline {
    QueryPipeline::new(embedder_slot(embedder), index, composer(client), 3, 100)
}

async fn ingest_text(
    embedder: Arc<LetterFrequencyEmbedder>,
    index: VectorIndex,
    body: &str,
) -> Result<docqa_pipeline::IngestReport> {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("report.txt");
    tokio::fs::write(&path, body).await.expect("write");

    let chunk_config = ChunkConfig::new(120, 20).expect("chunk config");
    let pipeline = IngestionPipeline::new(
        Chunker::new(chunk_config),
        embedder_slot(embedder),
        index,
        Duration::from_millis(5),
        Duration::from_secs(5),
    );
    pipeline.ingest(&TextFileSource::new(&path)).await
}

#[tokio::test]
async fn test_ingest_then_ask_end_to_end() -> Result<()> {
    let embedder = LetterFrequencyEmbedder::new();
    let index = VectorIndex::open_memory("e2e").await?;

    let body = "Annual revenue grew twenty percent. \
                The engineering team expanded to eighty people. \
                Cash reserves remain strong across all markets.";
    let report = ingest_text(embedder.clone(), index.clone(), body).await?;
    assert_eq!(report.documents, 1);
    assert!(report.chunks >= 1);
    assert_eq!(report.records, report.chunks);

    let client = CannedCompletion::new("Summary: revenue grew twenty percent");
    let pipeline = query_pipeline(embedder, index, client.clone());
    let answer = pipeline.answer("How did revenue grow?").await?;

    // Colon formatting applied, citations carry the corpus URL.
    assert_eq!(answer.answer, "Summary:\nrevenue grew twenty percent");
    assert!(!answer.sources.is_empty());
    assert!(answer.sources.len() <= 3);
    for source in &answer.sources {
        assert_eq!(source.document_url, "https://example.com/report.pdf");
    }

    // The prompt embedded both the context and the verbatim question.
    let prompts = client.prompts.lock().expect("lock");
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("Use the following pieces of context"));
    assert!(prompts[0].ends_with("Question: How did revenue grow?"));
    Ok(())
}

#[tokio::test]
async fn test_empty_corpus_still_answers() -> Result<()> {
    let embedder = LetterFrequencyEmbedder::new();
    let index = VectorIndex::open_memory("empty").await?;
    index.build_index().await?;

    let client = CannedCompletion::new("I have no relevant context for that.");
    let pipeline = query_pipeline(embedder, index, client);
    let answer = pipeline.answer("What happened last quarter?").await?;

    assert_eq!(answer.answer, "I have no relevant context for that.");
    assert!(answer.sources.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_model_unavailable_degrades_to_fallback() -> Result<()> {
    let embedder = LetterFrequencyEmbedder::new();
    let index = VectorIndex::open_memory("fallback").await?;
    ingest_text(embedder.clone(), index.clone(), "Some indexed content here.").await?;

    let pipeline = query_pipeline(embedder, index, Arc::new(UnavailableCompletion));
    let answer = pipeline.answer("Anything?").await?;

    assert_eq!(answer.answer, MODEL_UNAVAILABLE_ANSWER);
    assert!(answer.sources.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unready_index_degrades_to_generic_fallback() -> Result<()> {
    let embedder = LetterFrequencyEmbedder::new();
    // Never built: search will report the index as not ready.
    let index = VectorIndex::open_memory("unready").await?;

    let client = CannedCompletion::new("unused");
    let pipeline = query_pipeline(embedder, index, client.clone());
    let answer = pipeline.answer("Anything?").await?;

    assert!(answer.answer.starts_with("An error occurred:"));
    assert!(answer.sources.is_empty());
    // The model was never invoked.
    assert!(client.prompts.lock().expect("lock").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_overlapping_chunks_deduplicated_in_sources() -> Result<()> {
    let embedder = LetterFrequencyEmbedder::new();
    let index = VectorIndex::open_memory("dedupe").await?;

    // Two records sharing their first 100+ characters but with
    // different tails, plus one distinct record.
    let shared: String = "the quarterly report shows sustained growth in every segment "
        .repeat(3);
    index
        .upsert_batch(&[
            docqa_index::IndexedRecord {
                text: format!("{shared} tail alpha"),
                embedding: LetterFrequencyEmbedder::vector(&shared),
                page_label: Some("1".to_string()),
            },
            docqa_index::IndexedRecord {
                text: format!("{shared} tail beta"),
                embedding: LetterFrequencyEmbedder::vector(&shared),
                page_label: Some("2".to_string()),
            },
        ])
        .await?;
    index.build_index().await?;

    let client = CannedCompletion::new("Growth was sustained.");
    let pipeline = query_pipeline(embedder, index, client);
    let answer = pipeline.answer("How is growth?").await?;

    // Only the first-ranked of the two near-duplicates survives.
    assert_eq!(answer.sources.len(), 1);
    assert!(answer.sources[0].text.ends_with("tail alpha"));
    Ok(())
}

#[tokio::test]
async fn test_empty_query_rejected_before_any_work() -> Result<()> {
    let embedder = LetterFrequencyEmbedder::new();
    let index = VectorIndex::open_memory("reject").await?;
    index.build_index().await?;

    let client = CannedCompletion::new("unused");
    let pipeline = query_pipeline(embedder.clone(), index, client.clone());

    for query in ["", "   ", "\n\t"] {
        let err = pipeline.answer(query).await.unwrap_err();
        assert!(matches!(err, QaError::EmptyQuery));
    }

    // Rejected before touching the embedder or the model.
    assert_eq!(embedder.call_count(), 0);
    assert!(client.prompts.lock().expect("lock").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_source_file_aborts_ingestion_without_writes() -> Result<()> {
    let embedder = LetterFrequencyEmbedder::new();
    let index = VectorIndex::open_memory("loader").await?;

    let chunk_config = ChunkConfig::new(120, 20).expect("chunk config");
    let pipeline = IngestionPipeline::new(
        Chunker::new(chunk_config),
        embedder_slot(embedder.clone()),
        index.clone(),
        Duration::from_millis(5),
        Duration::from_secs(5),
    );

    let err = pipeline
        .ingest(&TextFileSource::new("/nonexistent/report.txt"))
        .await
        .unwrap_err();
    assert!(matches!(err, QaError::Loader { .. }));

    // Aborted before embedding or any write.
    assert_eq!(embedder.call_count(), 0);
    assert_eq!(index.stats().await?.records, 0);
    Ok(())
}

/// Produces vectors of inconsistent dimension, so the index rejects
/// the whole batch.
struct RaggedEmbedder;

#[async_trait]
impl Embedder for RaggedEmbedder {
    async fn embed_one(&self, _text: &str) -> docqa_embed::Result<Vec<f16>> {
        Ok(vec![f16::from_f32(1.0); 2])
    }

    async fn embed_many(&self, texts: &[String]) -> docqa_embed::Result<EmbeddingBatch> {
        Ok(EmbeddingBatch::new(
            texts
                .iter()
                .enumerate()
                .map(|(i, _)| vec![f16::from_f32(1.0); 2 + i % 2])
                .collect(),
        ))
    }

    fn dimension(&self) -> usize {
        2
    }

    fn model_id(&self) -> &str {
        "ragged-test"
    }
}

#[tokio::test]
async fn test_failed_upsert_leaves_no_records_or_metadata() -> Result<()> {
    let index = VectorIndex::open_memory("atomic").await?;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("report.txt");
    // Long enough for several chunks so the batch mixes dimensions.
    tokio::fs::write(&path, "sentence of report text. ".repeat(30))
        .await
        .expect("write");

    let pipeline = IngestionPipeline::new(
        Chunker::new(ChunkConfig::new(120, 20).expect("chunk config")),
        Arc::new(Lazy::ready(Arc::new(RaggedEmbedder) as Arc<dyn Embedder>)),
        index.clone(),
        Duration::from_millis(5),
        Duration::from_secs(5),
    );
    let err = pipeline
        .ingest(&TextFileSource::new(&path))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QaError::Index(docqa_index::IndexError::DimensionMismatch { .. })
    ));

    // The failed run is invisible: no records, no model stamp, no
    // pinned dimension.
    let stats = index.stats().await?;
    assert_eq!(stats.records, 0);
    assert!(stats.model_id.is_none());
    assert!(stats.dimension.is_none());
    Ok(())
}

#[tokio::test]
async fn test_reingestion_accumulates_records() -> Result<()> {
    let embedder = LetterFrequencyEmbedder::new();
    let index = VectorIndex::open_memory("additive").await?;

    let body = "A short report body.";
    let first = ingest_text(embedder.clone(), index.clone(), body).await?;
    let second = ingest_text(embedder, index.clone(), body).await?;

    assert_eq!(first.records, second.records);
    assert_eq!(
        index.stats().await?.records,
        first.records + second.records
    );
    Ok(())
}
