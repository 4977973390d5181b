pub mod splitter;

pub use splitter::{Chunk, ChunkConfig, ChunkError, Chunker, Chunks, DEFAULT_BOUNDARY_PATTERNS};
