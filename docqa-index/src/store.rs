//! SQLite-backed vector index.
//!
//! Records are append-only (text, embedding, page label) rows owned by
//! the index; they are never mutated and only disappear through a full
//! re-ingestion (dropping the database file). Embeddings are stored as
//! f16 blobs and scanned exactly at query time.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE records (
//!     id INTEGER PRIMARY KEY AUTOINCREMENT,
//!     corpus TEXT,                 -- corpus this record belongs to
//!     text TEXT,                   -- chunk text
//!     embedding BLOB,              -- f16 vector
//!     page_label TEXT,             -- source page, if known
//!     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! );
//!
//! CREATE TABLE index_meta (
//!     corpus TEXT PRIMARY KEY,
//!     state TEXT,                  -- absent | building | ready
//!     dimension INTEGER,           -- fixed per corpus, set on first write
//!     model_id TEXT,               -- embedding model the corpus was built with
//!     updated_at INTEGER
//! );
//! ```
//!
//! WAL mode keeps reads flowing while ingestion writes; writes serialize
//! through SQLite's single writer.

use half::f16;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{IndexError, Result};

/// Bounded retry policy for transient store failures.
const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// A persisted (text, embedding, page label) triple.
#[derive(Debug, Clone)]
pub struct IndexedRecord {
    pub text: String,
    pub embedding: Vec<f16>,
    pub page_label: Option<String>,
}

/// An ephemeral search hit: never persisted, discarded after the
/// response is assembled.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetrievalResult {
    pub text: String,
    pub page_label: Option<String>,
    pub score: f32,
}

/// Readiness of the search structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// No index has ever been published for this corpus.
    Absent,
    /// A build is in flight; search is not yet allowed.
    Building,
    /// The index is published and searchable.
    Ready,
}

impl IndexState {
    fn as_str(&self) -> &'static str {
        match self {
            IndexState::Absent => "absent",
            IndexState::Building => "building",
            IndexState::Ready => "ready",
        }
    }

    fn parse(s: &str) -> IndexState {
        match s {
            "building" => IndexState::Building,
            "ready" => IndexState::Ready,
            _ => IndexState::Absent,
        }
    }
}

impl std::fmt::Display for IndexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts and metadata reported by [`VectorIndex::stats`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub records: usize,
    pub dimension: Option<usize>,
    pub model_id: Option<String>,
    pub state: String,
}

/// SQLite-backed store of indexed records with exact cosine search.
#[derive(Clone, Debug)]
pub struct VectorIndex {
    corpus: String,
    pool: SqlitePool,
}

impl VectorIndex {
    /// Open (creating if missing) the index database at `path`.
    pub async fn open(path: &Path, corpus: impl Into<String>) -> Result<Self> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(Duration::from_secs(5))
                .create_if_missing(true),
        )
        .await
        .map_err(|source| IndexError::Unavailable { source })?;
        Self::new_with_pool(corpus.into(), pool).await
    }

    /// Open an in-memory index for testing.
    ///
    /// Pinned to a single connection: every pooled `:memory:`
    /// connection would otherwise see its own empty database.
    pub async fn open_memory(corpus: impl Into<String>) -> Result<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|source| IndexError::Unavailable { source })?;
        Self::new_with_pool(corpus.into(), pool).await
    }

    async fn new_with_pool(corpus: String, pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { corpus, pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                corpus TEXT NOT NULL,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL,
                page_label TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|source| IndexError::Unavailable { source })?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_records_corpus ON records(corpus)")
            .execute(pool)
            .await
            .map_err(|source| IndexError::Unavailable { source })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS index_meta (
                corpus TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                dimension INTEGER,
                model_id TEXT,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|source| IndexError::Unavailable { source })?;

        Ok(())
    }

    pub fn corpus(&self) -> &str {
        &self.corpus
    }

    /// Stamp the corpus metadata with the embedding model it was built
    /// with. Records with a different dimension are rejected afterwards.
    pub async fn record_model(&self, model_id: &str, dimension: usize) -> Result<()> {
        if let Some((_, Some(existing), _)) = self.fetch_meta().await? {
            if existing != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: existing,
                    actual: dimension,
                });
            }
        }
        let now = chrono::Utc::now().timestamp();
        let corpus = self.corpus.clone();
        let model_id = model_id.to_string();
        with_retry("record model", || {
            let pool = self.pool.clone();
            let corpus = corpus.clone();
            let model_id = model_id.clone();
            async move {
                sqlx::query(
                    r#"
                    INSERT INTO index_meta (corpus, state, dimension, model_id, updated_at)
                    VALUES (?1, 'absent', ?2, ?3, ?4)
                    ON CONFLICT(corpus) DO UPDATE SET
                        dimension = excluded.dimension,
                        model_id = excluded.model_id,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&corpus)
                .bind(dimension as i64)
                .bind(&model_id)
                .bind(now)
                .execute(&pool)
                .await
                .map(|_| ())
            }
        })
        .await
    }

    /// Append a batch of records in a single transaction.
    ///
    /// Appends only: content is never deduplicated on write, so
    /// re-ingesting the same documents accumulates duplicate records.
    /// All records must share the corpus dimension; on any failure the
    /// whole batch rolls back and nothing becomes visible.
    pub async fn upsert_batch(&self, records: &[IndexedRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let dimension = records[0].embedding.len();
        for record in records {
            if record.embedding.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    actual: record.embedding.len(),
                });
            }
        }
        if let Some((_, Some(existing), _)) = self.fetch_meta().await? {
            if existing != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: existing,
                    actual: dimension,
                });
            }
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|source| IndexError::Unavailable { source })?;

        for record in records {
            let embedding_bytes: Vec<u8> =
                bytemuck::cast_slice::<f16, u8>(&record.embedding).to_vec();
            sqlx::query(
                "INSERT INTO records (corpus, text, embedding, page_label) VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&self.corpus)
            .bind(&record.text)
            .bind(embedding_bytes)
            .bind(record.page_label.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(|source| IndexError::Unavailable { source })?;
        }

        // Make sure the meta row exists so the dimension is pinned from
        // the first write onward.
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO index_meta (corpus, state, dimension, updated_at)
            VALUES (?1, 'absent', ?2, ?3)
            ON CONFLICT(corpus) DO UPDATE SET
                dimension = COALESCE(index_meta.dimension, excluded.dimension),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.corpus)
        .bind(dimension as i64)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|source| IndexError::Unavailable { source })?;

        tx.commit()
            .await
            .map_err(|source| IndexError::Unavailable { source })?;

        info!(
            "Inserted {} records into corpus '{}'",
            records.len(),
            self.corpus
        );
        Ok(records.len())
    }

    /// Publish the search structure for this corpus.
    ///
    /// Transitions `Absent -> Building -> Ready`. Idempotent: calling it
    /// when already `Ready` republishes the current definition. Callers
    /// must observe readiness through [`Self::state`] or
    /// [`Self::wait_ready`] before relying on `search`.
    pub async fn build_index(&self) -> Result<()> {
        self.set_state(IndexState::Building).await?;
        debug!("Building index for corpus '{}'", self.corpus);

        // Exact-scan search has no auxiliary structure to construct;
        // refresh the query planner statistics as the publish step.
        with_retry("analyze", || {
            let pool = self.pool.clone();
            async move { sqlx::query("ANALYZE").execute(&pool).await.map(|_| ()) }
        })
        .await?;

        self.set_state(IndexState::Ready).await?;
        info!("Index for corpus '{}' is ready", self.corpus);
        Ok(())
    }

    /// Current readiness state.
    pub async fn state(&self) -> Result<IndexState> {
        Ok(self
            .fetch_meta()
            .await?
            .map(|(state, _, _)| state)
            .unwrap_or(IndexState::Absent))
    }

    /// Poll at `poll_interval` until the index is `Ready`, giving up
    /// after `timeout`.
    pub async fn wait_ready(&self, poll_interval: Duration, timeout: Duration) -> Result<()> {
        let started = tokio::time::Instant::now();
        loop {
            if self.state().await? == IndexState::Ready {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(IndexError::BuildTimeout { timeout });
            }
            debug!(
                "Index for corpus '{}' not ready yet, polling again in {:?}",
                self.corpus, poll_interval
            );
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Exact cosine search: up to `k` results, descending score, ties
    /// kept in insertion order.
    pub async fn search(&self, query: &[f16], k: usize) -> Result<Vec<RetrievalResult>> {
        let (state, dimension, _) = self
            .fetch_meta()
            .await?
            .unwrap_or((IndexState::Absent, None, None));
        if state != IndexState::Ready {
            return Err(IndexError::NotReady { state });
        }
        if let Some(dimension) = dimension {
            if query.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    actual: query.len(),
                });
            }
        }

        let corpus = self.corpus.clone();
        let rows = with_retry("search scan", || {
            let pool = self.pool.clone();
            let corpus = corpus.clone();
            async move {
                sqlx::query(
                    "SELECT id, text, embedding, page_label FROM records
                     WHERE corpus = ?1 ORDER BY id",
                )
                .bind(&corpus)
                .fetch_all(&pool)
                .await
            }
        })
        .await?;

        let mut scored: Vec<(f32, RetrievalResult)> = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.get("id");
            let text: String = row.get("text");
            let page_label: Option<String> = row.get("page_label");
            let embedding_bytes: Vec<u8> = row.get("embedding");

            if embedding_bytes.len() % 2 != 0 {
                return Err(IndexError::CorruptRecord {
                    id,
                    message: "embedding blob has odd length".to_string(),
                });
            }
            let embedding: Vec<f16> = bytemuck::pod_collect_to_vec(&embedding_bytes);
            let score = cosine_similarity(query, &embedding);
            scored.push((
                score,
                RetrievalResult {
                    text,
                    page_label,
                    score,
                },
            ));
        }

        // Stable sort keeps equal scores in id (insertion) order.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored.into_iter().map(|(_, result)| result).collect())
    }

    /// Record count, dimension, model, and state for this corpus.
    pub async fn stats(&self) -> Result<IndexStats> {
        let corpus = self.corpus.clone();
        let records: i64 = with_retry("count records", || {
            let pool = self.pool.clone();
            let corpus = corpus.clone();
            async move {
                sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE corpus = ?1")
                    .bind(&corpus)
                    .fetch_one(&pool)
                    .await
            }
        })
        .await?;

        let (state, dimension, model_id) = self
            .fetch_meta()
            .await?
            .unwrap_or((IndexState::Absent, None, None));

        Ok(IndexStats {
            records: records as usize,
            dimension,
            model_id,
            state: state.to_string(),
        })
    }

    async fn set_state(&self, state: IndexState) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let corpus = self.corpus.clone();
        with_retry("set state", || {
            let pool = self.pool.clone();
            let corpus = corpus.clone();
            async move {
                sqlx::query(
                    r#"
                    INSERT INTO index_meta (corpus, state, updated_at)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(corpus) DO UPDATE SET
                        state = excluded.state,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&corpus)
                .bind(state.as_str())
                .bind(now)
                .execute(&pool)
                .await
                .map(|_| ())
            }
        })
        .await
    }

    async fn fetch_meta(&self) -> Result<Option<(IndexState, Option<usize>, Option<String>)>> {
        let corpus = self.corpus.clone();
        let row = with_retry("fetch meta", || {
            let pool = self.pool.clone();
            let corpus = corpus.clone();
            async move {
                sqlx::query(
                    "SELECT state, dimension, model_id FROM index_meta WHERE corpus = ?1",
                )
                .bind(&corpus)
                .fetch_optional(&pool)
                .await
            }
        })
        .await?;

        Ok(row.map(|row| {
            let state: String = row.get("state");
            let dimension: Option<i64> = row.get("dimension");
            let model_id: Option<String> = row.get("model_id");
            (
                IndexState::parse(&state),
                dimension.map(|d| d as usize),
                model_id,
            )
        }))
    }
}

/// Cosine similarity between two f16 vectors.
fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f32::from(*x) * f32::from(*y))
        .sum();
    let norm_a: f32 = a.iter().map(|x| f32::from(*x).powi(2)).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| f32::from(*x).powi(2)).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Run `f`, retrying transient store errors with exponential backoff up
/// to [`RETRY_ATTEMPTS`] times, then surface `Unavailable`.
async fn with_retry<T, F, Fut>(op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < RETRY_ATTEMPTS && is_transient(&e) => {
                warn!("{op} failed (attempt {attempt}/{RETRY_ATTEMPTS}): {e}; retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(source) => return Err(IndexError::Unavailable { source }),
        }
    }
}

fn is_transient(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            let message = db.message();
            message.contains("locked") || message.contains("busy")
        }
        _ => false,
    }
}
