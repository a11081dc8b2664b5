use serde::{Deserialize, Serialize};

use crate::config::ExtractionConfig;
use crate::error::{OntoKgError, Result};

/// One unit of extraction work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub tokens: usize,
}

/// Split a document into chunks.
///
/// Paragraphs (separated by blank lines) are packed greedily up to
/// `chunk_size_tokens`; a paragraph that is larger on its own is split with
/// overlap by [`chunk_text`].
pub fn chunk_document(text: &str, config: &ExtractionConfig) -> Result<Vec<Chunk>> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in paragraphs(text) {
        if estimate_tokens(paragraph) > config.chunk_size_tokens {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(chunk_text(
                paragraph,
                config.chunk_size_tokens,
                config.chunk_overlap_tokens,
            )?);
            continue;
        }
        if !current.is_empty()
            && estimate_tokens(&current) + estimate_tokens(paragraph) > config.chunk_size_tokens
        {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk {
            index,
            tokens: estimate_tokens(&text),
            text,
        })
        .collect())
}

fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n").map(str::trim).filter(|p| !p.is_empty())
}

/// Chunk text with overlap.
///
/// Uses character-based approximation: ~4 characters per token. Chunk ends snap back
/// to whitespace or sentence punctuation within the last fifth of the window. All
/// slicing happens on UTF-8 character boundaries.
pub fn chunk_text(text: &str, size_tokens: usize, overlap_tokens: usize) -> Result<Vec<String>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    if size_tokens == 0 {
        return Err(OntoKgError::InvalidInput(
            "chunk size must be greater than 0".to_string(),
        ));
    }

    let char_size = size_tokens * 4;
    let char_overlap = overlap_tokens * 4;

    // Largest char boundary at or before `pos`
    let floor_boundary = |pos: usize| -> usize {
        let mut pos = pos.min(text.len());
        while !text.is_char_boundary(pos) {
            pos -= 1;
        }
        pos
    };

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let end = floor_boundary(start + char_size);

        let chunk_end = if end < text.len() {
            let search_start = floor_boundary(end.saturating_sub(char_size / 5)).max(start);
            text[search_start..end]
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace() || matches!(c, '.' | '!' | '?'))
                .map(|(offset, c)| search_start + offset + c.len_utf8())
                .filter(|boundary| *boundary > start)
                .unwrap_or(end)
        } else {
            end
        };
        // A window narrower than one character still has to make progress.
        let chunk_end = if chunk_end <= start {
            text[start..].chars().next().map_or(text.len(), |c| start + c.len_utf8())
        } else {
            chunk_end
        };

        let piece = text[start..chunk_end].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }

        if chunk_end >= text.len() {
            break;
        }

        let next = floor_boundary(chunk_end.saturating_sub(char_overlap));
        start = if next <= start { chunk_end } else { next };
    }

    Ok(chunks)
}

/// Estimate token count from text (1 token ≈ 4 characters).
pub fn estimate_tokens(text: &str) -> usize {
    (text.len() + 3) / 4
}
