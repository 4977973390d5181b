use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use docqa_chunk::Chunker;
use docqa_embed::{Embedder, FastEmbedder};
use docqa_index::VectorIndex;
use docqa_pipeline::{
    AnswerComposer, CompletionClient, HttpCompletionClient, IngestionPipeline, Lazy, QaConfig,
    QueryPipeline, TextFileSource,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "docqa")]
#[command(about = "Retrieval-augmented question answering over ingested documents")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "docqa.toml")]
    config: PathBuf,

    /// Override the database path from the configuration.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Override the corpus name from the configuration.
    #[arg(long)]
    corpus: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed, and index a document, then publish the index.
    Ingest {
        /// Text file to ingest; falls back to `document_path` from the
        /// configuration.
        #[arg(long)]
        source: Option<PathBuf>,
    },
    /// Ask a question against the populated index.
    Ask {
        /// The question text.
        question: String,
    },
    /// Show index state and record counts.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = QaConfig::load(&cli.config)
        .await
        .context("loading configuration")?;
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }
    if let Some(corpus) = cli.corpus {
        config.corpus = corpus;
    }
    config.validate().context("validating configuration")?;

    let index = VectorIndex::open(&config.db_path, config.corpus.clone())
        .await
        .context("opening vector index")?;

    match cli.command {
        Command::Ingest { source } => {
            let path = match source.or_else(|| config.document_path.clone()) {
                Some(path) => path,
                None => bail!("no document source: pass --source or set document_path"),
            };

            let pipeline = IngestionPipeline::new(
                Chunker::new(config.chunk_config()),
                embedder_slot(&config),
                index,
                config.readiness_poll(),
                config.readiness_timeout(),
            );
            let report = pipeline
                .ingest(&TextFileSource::new(path))
                .await
                .context("ingestion failed")?;
            println!(
                "Ingested {} document(s) as {} record(s) ({} chunk(s))",
                report.documents, report.records, report.chunks
            );
        }
        Command::Ask { question } => {
            let completion = config.completion.clone();
            let client: Arc<Lazy<dyn CompletionClient>> = Arc::new(Lazy::new(move || {
                let completion = completion.clone();
                async move {
                    let client = HttpCompletionClient::create(&completion)?;
                    Ok(Arc::new(client) as Arc<dyn CompletionClient>)
                }
            }));
            let composer = AnswerComposer::new(
                client,
                config.completion.max_tokens,
                config.document_url.clone(),
            );
            let pipeline = QueryPipeline::new(
                embedder_slot(&config),
                index,
                composer,
                config.top_k,
                config.dedupe_prefix_len,
            );

            let answer = pipeline.answer(&question).await?;
            println!("{}", answer.answer);
            if !answer.sources.is_empty() {
                println!("\nSources:");
                for (i, source) in answer.sources.iter().enumerate() {
                    let page = source
                        .page_number
                        .as_deref()
                        .map(|p| format!(" (page {p})"))
                        .unwrap_or_default();
                    let preview: String = source.text.chars().take(150).collect();
                    println!("  {}.{page} {preview}", i + 1);
                }
            }
        }
        Command::Status => {
            let stats = index.stats().await.context("reading index stats")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

/// Lazily-initialized embedding model shared by both pipelines.
fn embedder_slot(config: &QaConfig) -> Arc<Lazy<dyn Embedder>> {
    let embed_config = config.embedding.clone();
    Arc::new(Lazy::new(move || {
        let embed_config = embed_config.clone();
        async move {
            let embedder = FastEmbedder::create(embed_config).await?;
            Ok(Arc::new(embedder) as Arc<dyn Embedder>)
        }
    }))
}
