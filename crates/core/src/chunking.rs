use crate::error::IngestError;
use crate::models::{Chunk, ChunkMetadata, IngestionOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, IngestError> {
        if chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }

        if chunk_overlap >= chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {chunk_overlap} must be smaller than chunk_size {chunk_size}"
            )));
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

impl TryFrom<IngestionOptions> for ChunkingConfig {
    type Error = IngestError;

    fn try_from(value: IngestionOptions) -> Result<Self, Self::Error> {
        Self::new(value.chunk_size, value.chunk_overlap)
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Boundary kinds in the order they are preferred when closing a chunk.
#[derive(Debug, Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Word,
}

impl Boundary {
    const PREFERENCE: [Boundary; 4] = [
        Boundary::Paragraph,
        Boundary::Line,
        Boundary::Sentence,
        Boundary::Word,
    ];

    /// True when a chunk ending right before `end` finishes on this boundary.
    fn closes_at(self, chars: &[char], end: usize) -> bool {
        if end == 0 {
            return false;
        }
        let last = chars[end - 1];
        match self {
            Boundary::Paragraph => end >= 2 && last == '\n' && chars[end - 2] == '\n',
            Boundary::Line => last == '\n',
            Boundary::Sentence => {
                end >= 2 && last.is_whitespace() && matches!(chars[end - 2], '.' | '!' | '?')
            }
            Boundary::Word => last.is_whitespace(),
        }
    }
}

/// Splits `text` into windows of at most `chunk_size` characters.
///
/// Consecutive windows share exactly `chunk_overlap` characters, so dropping
/// the first `chunk_overlap` characters of every window after the first and
/// concatenating gives back the input. Each window is closed on the strongest
/// natural boundary found in its second half, or cut hard at `chunk_size`.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= config.chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let hard_end = (start + config.chunk_size).min(chars.len());
        if hard_end == chars.len() {
            chunks.push(chars[start..].iter().collect());
            break;
        }

        let end = natural_end(&chars, start, hard_end, config);
        chunks.push(chars[start..end].iter().collect());
        start = end - config.chunk_overlap;
    }

    chunks
}

fn natural_end(chars: &[char], start: usize, hard_end: usize, config: ChunkingConfig) -> usize {
    // Anything at or before this point would leave the next window without progress.
    let earliest = start + (config.chunk_overlap + 1).max(config.chunk_size / 2);
    if earliest >= hard_end {
        return hard_end;
    }

    for boundary in Boundary::PREFERENCE {
        if let Some(end) = (earliest..=hard_end)
            .rev()
            .find(|&end| boundary.closes_at(chars, end))
        {
            return end;
        }
    }

    hard_end
}

/// Splits a document's text and tags every piece with its provenance.
pub fn build_chunks(text: &str, metadata: &ChunkMetadata, config: ChunkingConfig) -> Vec<Chunk> {
    split_text(text, config)
        .into_iter()
        .map(|piece| Chunk {
            text: piece,
            metadata: metadata.clone(),
        })
        .collect()
}
