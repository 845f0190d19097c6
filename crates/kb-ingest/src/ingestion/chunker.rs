//! Token-bounded text chunking with exact overlap

use unicode_segmentation::UnicodeSegmentation;

use crate::error::{Error, Result};

/// One span produced by the chunker, before embedding
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkSpan {
    pub content: String,
    /// Zero-based position in the chunk set
    pub index: u32,
    /// Tokens in this span
    pub token_count: u32,
}

/// Splits text into overlapping token-bounded spans
///
/// The token unit is the extended grapheme cluster, so concatenating the
/// non-overlapping regions of consecutive spans reproduces the input
/// exactly, and the overlap between span `i` and `i+1` repeats exactly
/// `overlap` tokens.
#[derive(Debug, Clone)]
pub struct TokenChunker {
    chunk_size: usize,
    overlap: usize,
}

impl TokenChunker {
    /// Create a chunker; fails unless `0 <= overlap < chunk_size` and
    /// `chunk_size > 0`
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::invalid_input("chunk_size must be positive"));
        }
        if overlap >= chunk_size {
            return Err(Error::invalid_input(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Split `text` into ordered spans covering the whole token stream
    pub fn chunk(&self, text: &str) -> Result<Vec<ChunkSpan>> {
        if text.is_empty() {
            return Err(Error::invalid_input("cannot chunk empty text"));
        }

        // Byte offset of each token plus a trailing sentinel, so any token
        // range maps back to a subslice of the input.
        let mut offsets: Vec<usize> = text.grapheme_indices(true).map(|(i, _)| i).collect();
        offsets.push(text.len());
        let total_tokens = offsets.len() - 1;

        let mut spans = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + self.chunk_size).min(total_tokens);
            spans.push(ChunkSpan {
                content: text[offsets[start]..offsets[end]].to_string(),
                index: spans.len() as u32,
                token_count: (end - start) as u32,
            });
            if end == total_tokens {
                break;
            }
            start = end - self.overlap;
        }

        Ok(spans)
    }
}
