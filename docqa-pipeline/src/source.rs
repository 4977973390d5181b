//! Document sources for ingestion.

use crate::error::{QaError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// A loaded document: raw text plus an optional page label, immutable
/// once ingested.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    pub page_label: Option<String>,
}

impl Document {
    pub fn new(text: impl Into<String>, page_label: Option<String>) -> Self {
        Document {
            text: text.into(),
            page_label,
        }
    }

    /// Build from loader metadata. Printed page labels ("iv", "A-2")
    /// win over the zero-based physical page number when both exist.
    pub fn from_metadata(
        text: impl Into<String>,
        page_label: Option<String>,
        page: Option<u32>,
    ) -> Self {
        let label = page_label.or_else(|| page.map(|p| p.to_string()));
        Document::new(text, label)
    }
}

/// Something that can produce documents for ingestion.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Document>>;

    /// Human-readable locator for logs.
    fn describe(&self) -> String;
}

/// Loads a plain-text file. Form feeds (`\x0c`) mark page breaks, as
/// emitted by common PDF-to-text converters; a file without them is a
/// single unlabelled document.
pub struct TextFileSource {
    path: PathBuf,
}

impl TextFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TextFileSource { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DocumentSource for TextFileSource {
    async fn load(&self) -> Result<Vec<Document>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            QaError::loader(format!("failed to read {}: {e}", self.path.display()))
        })?;

        let pages: Vec<&str> = raw.split('\u{0c}').collect();
        let documents = if pages.len() == 1 {
            vec![Document::new(raw, None)]
        } else {
            pages
                .into_iter()
                .enumerate()
                .filter(|(_, page)| !page.trim().is_empty())
                .map(|(i, page)| {
                    Document::from_metadata(page, None, Some(i as u32 + 1))
                })
                .collect()
        };

        info!(
            "Loaded {} document(s) from {}",
            documents.len(),
            self.path.display()
        );
        Ok(documents)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A fixed in-memory document set, mainly for tests and seeding.
pub struct StaticSource {
    documents: Vec<Document>,
}

impl StaticSource {
    pub fn new(documents: Vec<Document>) -> Self {
        StaticSource { documents }
    }
}

#[async_trait]
impl DocumentSource for StaticSource {
    async fn load(&self) -> Result<Vec<Document>> {
        Ok(self.documents.clone())
    }

    fn describe(&self) -> String {
        format!("{} in-memory document(s)", self.documents.len())
    }
}
