//! Text extraction and chunking

pub mod chunker;
pub mod extractor;

pub use chunker::{ChunkSpan, TokenChunker};
pub use extractor::TextExtractor;
