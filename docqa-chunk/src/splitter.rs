//! Splitting document text into overlapping, retrieval-sized passages.
//!
//! A [`Chunker`] walks a document with a fixed character window
//! (`chunk_size`) and a fixed stride (`chunk_size - chunk_overlap`), so
//! consecutive chunks share `chunk_overlap` characters of context across
//! their boundary. Where the tail of a window contains a natural break
//! (paragraph, sentence end, line break, whitespace) the window end snaps
//! back to it; otherwise the cut is a hard one at the size limit.
//!
//! Chunks are produced lazily through the [`Chunks`] iterator, which can
//! be restarted by calling [`Chunker::chunks`] again. All sizes are in
//! characters, not bytes, so multi-byte text never splits mid-codepoint.
//!
//! ```
//! use docqa_chunk::{ChunkConfig, Chunker};
//!
//! let chunker = Chunker::new(ChunkConfig::new(400, 20).unwrap());
//! let text = "a".repeat(1000);
//! let chunks: Vec<_> = chunker.chunks(&text, Some("1")).collect();
//! assert_eq!(chunks.len(), 3);
//! assert!(chunks.iter().all(|c| c.text.chars().count() <= 400));
//! ```

use regex::Regex;
use serde::Serialize;

/// Boundary patterns tried in order when snapping a window end to a
/// natural break: paragraph, sentence end, line break, whitespace.
pub const DEFAULT_BOUNDARY_PATTERNS: &[&str] = &[
    r"\n\n",    // Paragraphs
    r"[.!?]\s", // Sentence ends
    r"\n",      // Line breaks
    r"\s",      // Whitespace
];

/// Errors raised while validating chunking parameters.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// The chunking parameters cannot produce a valid sequence of chunks.
    #[error("invalid chunking configuration: {message}")]
    InvalidConfig { message: String },
}

impl ChunkError {
    fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Chunking parameters, validated at construction.
///
/// `chunk_overlap` must be strictly smaller than `chunk_size`; an overlap
/// at or above the window size would never advance through the document.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkError> {
        if chunk_size == 0 {
            return Err(ChunkError::invalid_config("chunk_size must be positive"));
        }
        if chunk_overlap >= chunk_size {
            return Err(ChunkError::invalid_config(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Window advance between consecutive chunk starts.
    pub fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

impl Default for ChunkConfig {
    /// 400-character windows with a 20-character overlap.
    fn default() -> Self {
        Self {
            chunk_size: 400,
            chunk_overlap: 20,
        }
    }
}

/// A single passage cut from a document, with its page label carried
/// through for citation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    /// The passage text, at most `chunk_size` characters.
    pub text: String,
    /// Page label of the originating document, if the loader had one.
    pub page_label: Option<String>,
    /// Position of this chunk within its document (0-indexed).
    pub sequence: usize,
}

/// Splits document text into overlapping chunks.
pub struct Chunker {
    config: ChunkConfig,
    boundaries: Vec<Regex>,
}

impl Chunker {
    /// Create a chunker with the default boundary patterns.
    pub fn new(config: ChunkConfig) -> Self {
        Self::with_boundaries(config, DEFAULT_BOUNDARY_PATTERNS)
    }

    /// Create a chunker with custom boundary patterns, tried in the order
    /// given (most significant first).
    ///
    /// # Panics
    ///
    /// Panics if any pattern is not a valid regular expression.
    pub fn with_boundaries(config: ChunkConfig, patterns: &[&str]) -> Self {
        let boundaries = patterns
            .iter()
            .map(|&p| Regex::new(p).expect("boundary pattern must be a valid regex"))
            .collect();
        Self { config, boundaries }
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Lazily iterate the chunks of `text`, in document order.
    ///
    /// A document shorter than `chunk_size` yields exactly one chunk;
    /// empty text yields none. The iterator borrows `text` and may be
    /// recreated to restart from the beginning.
    pub fn chunks<'a>(&'a self, text: &'a str, page_label: Option<&str>) -> Chunks<'a> {
        // Byte offset of every char, plus an end sentinel, so windows can
        // be measured in chars but sliced by byte.
        let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        offsets.push(text.len());
        Chunks {
            chunker: self,
            text,
            page_label: page_label.map(str::to_owned),
            offsets,
            pos: 0,
            sequence: 0,
        }
    }

    /// Pick the end (exclusive, in chars) of the window starting at
    /// `start`, snapping back to the latest natural boundary in the tail
    /// of the window when one leaves enough room to keep advancing.
    fn window_end(&self, offsets: &[usize], text: &str, start: usize) -> usize {
        let total = offsets.len() - 1;
        let hard_end = (start + self.config.chunk_size).min(total);
        if hard_end == total {
            return total;
        }

        // A snapped cut must still advance past the overlap region, and
        // chunks snapped to less than half the window are not worth it.
        let min_end = start + (self.config.chunk_overlap + 1).max(self.config.chunk_size / 2);
        let window = &text[offsets[start]..offsets[hard_end]];

        for boundary in &self.boundaries {
            let mut best: Option<usize> = None;
            for mat in boundary.find_iter(window) {
                let end_chars = start + window[..mat.end()].chars().count();
                if end_chars >= min_end && end_chars < hard_end {
                    best = Some(best.map_or(end_chars, |b: usize| b.max(end_chars)));
                }
            }
            if let Some(end) = best {
                return end;
            }
        }
        hard_end
    }
}

/// Lazy iterator over a document's chunks. See [`Chunker::chunks`].
pub struct Chunks<'a> {
    chunker: &'a Chunker,
    text: &'a str,
    page_label: Option<String>,
    offsets: Vec<usize>,
    pos: usize,
    sequence: usize,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let total = self.offsets.len() - 1;
        if self.pos >= total {
            return None;
        }

        let start = self.pos;
        let end = self.chunker.window_end(&self.offsets, self.text, start);
        let chunk = Chunk {
            text: self.text[self.offsets[start]..self.offsets[end]].to_string(),
            page_label: self.page_label.clone(),
            sequence: self.sequence,
        };
        self.sequence += 1;

        if end == total {
            self.pos = total;
        } else {
            self.pos = end - self.chunker.config.chunk_overlap;
        }
        Some(chunk)
    }
}
