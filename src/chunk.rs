//! Fixed-window overlap chunker.
//!
//! Splits extracted document text into overlapping windows so that context
//! spanning a window boundary still appears whole in at least one chunk.
//!
//! # Algorithm
//!
//! 1. If the text is no longer than `chunk_size`, return it as the only
//!    chunk (an empty text yields one empty chunk).
//! 2. Otherwise emit `text[i .. min(i + chunk_size, len)]` for
//!    `i = 0, stride, 2 * stride, …` while `i < len`, where
//!    `stride = chunk_size - overlap`.
//!
//! Lengths and offsets are counted in `char`s (Unicode scalar values), never
//! bytes, so a boundary cannot split a code point. Boundaries are not word-
//! or grapheme-aware: a combining mark may land in a different chunk from
//! its base character.
//!
//! # Example
//!
//! ```rust
//! use chat_ingest::chunk::chunk_with_overlap;
//!
//! let chunks = chunk_with_overlap("abcdefghij", 4, 1);
//! assert_eq!(chunks, vec!["abcd", "defg", "ghij", "j"]);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Split `text` into windows of `chunk_size` chars sharing `overlap` chars.
///
/// `overlap < chunk_size` is a precondition enforced when configuration is
/// loaded; calling with a non-positive stride panics.
pub fn chunk_with_overlap(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    assert!(
        overlap < chunk_size,
        "chunk overlap ({}) must be smaller than chunk size ({})",
        overlap,
        chunk_size
    );

    // Byte offset of every char start, plus the end of the string.
    let mut offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    let len = offsets.len();
    offsets.push(text.len());

    if len <= chunk_size {
        return vec![text.to_string()];
    }

    let stride = chunk_size - overlap;
    let mut chunks = Vec::with_capacity(len.div_ceil(stride));
    let mut start = 0;
    while start < len {
        let end = (start + chunk_size).min(len);
        chunks.push(text[offsets[start]..offsets[end]].to_string());
        start += stride;
    }
    chunks
}

/// Chunk `text` with the configured size and overlap.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    chunk_with_overlap(text, config.chunk_size, config.overlap())
}

/// Attach ids, contiguous indices, and content hashes for persistence.
pub fn to_chunks(document_id: &str, texts: &[String]) -> Vec<Chunk> {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| make_chunk(document_id, i as i64, text))
        .collect()
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Char span `[start, end)` of each chunk, recovered from the stride.
    fn spans(chunks: &[String], stride: usize) -> Vec<(usize, usize)> {
        chunks
            .iter()
            .enumerate()
            .map(|(i, c)| (i * stride, i * stride + c.chars().count()))
            .collect()
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_with_overlap("Hello, world!", 2300, 575);
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn test_text_exactly_chunk_size_single_chunk() {
        let text = "x".repeat(2300);
        let chunks = chunk_with_overlap(&text, 2300, 575);
        assert_eq!(chunks, vec![text]);
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_with_overlap("", 2300, 575);
        assert_eq!(chunks, vec![String::new()]);
    }

    #[test]
    fn test_five_thousand_chars_default_config() {
        let text = "A".repeat(5000);
        let chunks = chunk_text(&text, &ChunkingConfig::default());
        let lengths: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(lengths, vec![2300, 2300, 1550]);

        let covered = spans(&chunks, 1725);
        assert_eq!(covered, vec![(0, 2300), (1725, 4025), (3450, 5000)]);
    }

    #[test]
    fn test_adjacent_chunks_share_overlap() {
        let text: String = (0..1000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = chunk_with_overlap(&text, 100, 25);
        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.len() >= 25 {
                assert_eq!(&prev[75..], &next[..25]);
            }
        }
    }

    #[test]
    fn test_every_position_covered() {
        let text: String = (0..997).map(|i| char::from(b'0' + (i % 10) as u8)).collect();
        for (size, overlap) in [(10, 0), (10, 9), (64, 16), (100, 1), (996, 500)] {
            let chunks = chunk_with_overlap(&text, size, overlap);
            let stride = size - overlap;
            let mut covered = vec![false; text.len()];
            for (start, end) in spans(&chunks, stride) {
                assert!(end - start <= size);
                assert_eq!(&text[start..end], chunks[start / stride]);
                covered[start..end].iter_mut().for_each(|c| *c = true);
            }
            assert!(covered.iter().all(|c| *c), "gap with size={size} overlap={overlap}");
        }
    }

    #[test]
    fn test_stops_once_start_passes_end() {
        // 10 chars, size 4, stride 3: starts 0, 3, 6, 9.
        let chunks = chunk_with_overlap("abcdefghij", 4, 1);
        assert_eq!(chunks, vec!["abcd", "defg", "ghij", "j"]);
    }

    #[test]
    fn test_multibyte_chars_counted_as_chars() {
        let text = "┌──┐│é😀│└──┘";
        assert_eq!(text.chars().count(), 12);
        let chunks = chunk_with_overlap(text, 5, 2);
        assert_eq!(chunks[0], "┌──┐│");
        assert_eq!(chunks[1], "┐│é😀│");
        for c in &chunks {
            assert!(c.chars().count() <= 5);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "lorem ipsum dolor sit amet ".repeat(300);
        let c1 = chunk_with_overlap(&text, 2300, 575);
        let c2 = chunk_with_overlap(&text, 2300, 575);
        assert_eq!(c1, c2);
    }

    #[test]
    #[should_panic(expected = "must be smaller")]
    fn test_non_advancing_overlap_panics() {
        chunk_with_overlap("abc", 2, 2);
    }

    #[test]
    fn test_to_chunks_indices_and_hashes() {
        let texts = vec!["alpha".to_string(), "beta".to_string(), "alpha".to_string()];
        let chunks = to_chunks("doc1", &texts);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.document_id, "doc1");
            assert_eq!(c.hash.len(), 64);
        }
        assert_eq!(chunks[0].hash, chunks[2].hash);
        assert_ne!(chunks[0].hash, chunks[1].hash);
        assert_ne!(chunks[0].id, chunks[2].id);
    }
}
