//! Token-bounded text chunking with overlap.
//!
//! Token counts are estimated from character counts (`CHARS_PER_TOKEN`), which
//! keeps chunking deterministic and independent of any model tokenizer.

use crate::error::{Error, Result};

pub const CHARS_PER_TOKEN: usize = 4;

/// Cheap, deterministic token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Target chunk size in estimated tokens.
    pub chunk_size: usize,
    /// Tokens shared by consecutive chunks.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { chunk_size: 500, overlap: 50 }
    }
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        let config = Self { chunk_size, overlap };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk size must be positive".into()));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Split `text` into ordered, overlapping chunks.
///
/// Chunk ends snap back to the last whitespace inside the window when one
/// exists in its second half, so words are rarely cut. A chunk never holds
/// more than `chunk_size * CHARS_PER_TOKEN` characters and each chunk starts
/// `overlap * CHARS_PER_TOKEN` characters before the previous one ended.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Result<Vec<String>> {
    config.validate()?;
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    // Byte offset of every char plus the end sentinel, so slicing stays on boundaries.
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    offsets.push(text.len());
    let total = offsets.len() - 1;
    let window = config.chunk_size * CHARS_PER_TOKEN;
    let overlap = config.overlap * CHARS_PER_TOKEN;
    let chars: Vec<char> = text.chars().collect();

    let mut chunks = Vec::new();
    let mut start = 0usize;
    loop {
        let hard_end = (start + window).min(total);
        let mut end = hard_end;
        if hard_end < total {
            let floor = start + window / 2;
            if let Some(ws) = (floor..hard_end).rev().find(|&i| chars[i].is_whitespace()) {
                end = ws + 1;
            }
            if end - start <= overlap {
                end = hard_end;
            }
        }
        chunks.push(text[offsets[start]..offsets[end]].to_string());
        if end >= total {
            break;
        }
        start = end - overlap;
    }
    Ok(chunks)
}
