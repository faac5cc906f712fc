//! Word-budgeted document chunker.
//!
//! Splits a long document into ordered segments along paragraph boundaries,
//! falling back to sentence boundaries when a single paragraph is over
//! budget. Chunks never drop content: concatenating them in index order
//! reproduces the original document up to whitespace normalization at the
//! chunk seams.
//!
//! A single sentence larger than the budget is emitted as its own oversized
//! chunk rather than being cut mid-sentence; this is the one documented case
//! where a chunk may exceed `max_words`.

use serde::{Deserialize, Serialize};

use crate::text::{split_sentences, word_count};

/// An ordered, bounded-size segment of a document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub word_count: usize,
}

/// Split `text` into chunks of at most `max_words` words each.
///
/// Paragraphs (`\n\n`) are accumulated greedily; an over-budget paragraph is
/// split at sentence boundaries, same greedy rule. Indices are contiguous
/// from 0. Deterministic: the same input always yields the same chunks,
/// which is what makes crash/abort resume by chunk index safe.
pub fn chunk_text(text: &str, max_words: usize) -> Vec<Chunk> {
    let max_words = max_words.max(1);
    let mut builder = ChunkBuilder::new(max_words);

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if word_count(paragraph) <= max_words {
            builder.push_unit(paragraph, "\n\n");
            continue;
        }

        // Paragraph alone exceeds the budget: flush and go sentence by
        // sentence within it.
        builder.flush();
        for sentence in split_sentences(paragraph) {
            builder.push_unit(sentence, " ");
        }
        builder.flush();
    }

    builder.finish()
}

/// Reassemble chunks in index order.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.index);
    ordered
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

struct ChunkBuilder {
    max_words: usize,
    chunks: Vec<Chunk>,
    buffer: String,
    buffer_words: usize,
}

impl ChunkBuilder {
    fn new(max_words: usize) -> Self {
        Self {
            max_words,
            chunks: Vec::new(),
            buffer: String::new(),
            buffer_words: 0,
        }
    }

    /// Add one indivisible unit (paragraph or sentence), flushing first if
    /// it would push the buffer over budget. A unit that alone exceeds the
    /// budget becomes its own oversized chunk.
    fn push_unit(&mut self, unit: &str, separator: &str) {
        let words = word_count(unit);

        if self.buffer_words + words > self.max_words && self.buffer_words > 0 {
            self.flush();
        }

        if words > self.max_words {
            debug_assert!(self.buffer.is_empty());
            self.chunks.push(Chunk {
                index: self.chunks.len(),
                text: unit.to_string(),
                word_count: words,
            });
            return;
        }

        if !self.buffer.is_empty() {
            self.buffer.push_str(separator);
        }
        self.buffer.push_str(unit);
        self.buffer_words += words;
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.buffer);
        let words = self.buffer_words;
        self.buffer_words = 0;
        self.chunks.push(Chunk {
            index: self.chunks.len(),
            text,
            word_count: words,
        });
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.flush();
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::normalize_whitespace;

    fn paragraphs(n: usize, words_each: usize) -> String {
        (0..n)
            .map(|i| {
                (0..words_each)
                    .map(|w| format!("p{}w{}", i, w))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("Hello world. Second sentence.", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].word_count, 4);
    }

    #[test]
    fn test_empty_text() {
        assert!(chunk_text("", 100).is_empty());
        assert!(chunk_text("\n\n  \n\n", 100).is_empty());
    }

    #[test]
    fn test_respects_budget() {
        let text = paragraphs(20, 30);
        let chunks = chunk_text(&text, 100);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.word_count <= 100, "chunk {} over budget", c.index);
        }
    }

    #[test]
    fn test_indices_contiguous() {
        let text = paragraphs(17, 25);
        let chunks = chunk_text(&text, 60);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, i);
        }
    }

    #[test]
    fn test_lossless_reassembly() {
        let text = paragraphs(12, 40);
        let chunks = chunk_text(&text, 90);
        assert_eq!(
            normalize_whitespace(&reassemble(&chunks)),
            normalize_whitespace(&text)
        );
    }

    #[test]
    fn test_oversized_paragraph_split_at_sentences() {
        // One paragraph of 30 sentences, 10 words each.
        let paragraph = (0..30)
            .map(|i| format!("Sentence {} has exactly these many little words here now.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&paragraph, 25);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.word_count <= 25);
        }
        assert_eq!(
            normalize_whitespace(&reassemble(&chunks)),
            normalize_whitespace(&paragraph)
        );
    }

    #[test]
    fn test_atomic_sentence_may_exceed_budget() {
        let sentence = (0..50).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let chunks = chunk_text(&sentence, 20);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].word_count, 50);
    }

    #[test]
    fn test_expected_chunk_count_for_uniform_text() {
        // 40 paragraphs x 100 words with a 1000-word budget packs 10
        // paragraphs per chunk.
        let text = paragraphs(40, 100);
        let chunks = chunk_text(&text, 1000);
        assert_eq!(chunks.len(), 4);
    }

    #[test]
    fn test_deterministic() {
        let text = paragraphs(9, 35);
        let a = chunk_text(&text, 80);
        let b = chunk_text(&text, 80);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.index, y.index);
        }
    }
}
