//! Sentence-aware text splitter

use regex::Regex;
use std::sync::OnceLock;

use kbqa_core::{Document, Error, Result, TextNode};

pub const DEFAULT_CHUNK_SIZE: usize = 1024;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
const PARAGRAPH_SEPARATOR: &str = "\n\n\n";

/// A contiguous piece of the source text
#[derive(Debug, Clone, Copy)]
struct Split {
    start: usize,
    end: usize,
    chars: usize,
}

/// Splits documents into overlapping chunks, preferring paragraph and
/// sentence boundaries. Sizes are measured in characters.
#[derive(Debug, Clone)]
pub struct SentenceSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for SentenceSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

fn clause_regex() -> &'static Regex {
    static CLAUSE: OnceLock<Regex> = OnceLock::new();
    // Leading delimiters belong to the first clause so pieces cover the whole text.
    CLAUSE.get_or_init(|| {
        Regex::new(r"[,.;，；、。？！]*[^,.;，；、。？！]+[,.;，；、。？！]*").expect("static regex")
    })
}

impl SentenceSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput("chunk_size must be greater than zero".to_string()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::InvalidInput(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split text into chunk strings
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.chunk_spans(text)
            .into_iter()
            .map(|(start, end)| text[start..end].to_string())
            .collect()
    }

    /// Split documents into nodes that keep a reference to their source document
    pub fn split_documents(&self, documents: &[Document]) -> Vec<TextNode> {
        let mut nodes = Vec::new();
        for document in documents {
            let text = &document.text;
            for (start, end) in self.chunk_spans(text) {
                let start_char = text[..start].chars().count();
                let end_char = start_char + text[start..end].chars().count();
                nodes.push(TextNode::from_document_chunk(
                    uuid::Uuid::new_v4().to_string(),
                    document,
                    &text[start..end],
                    start_char,
                    end_char,
                ));
            }
            tracing::debug!(doc_id = %document.id, nodes = nodes.len(), "split document");
        }
        nodes
    }

    /// Byte spans of trimmed, non-empty chunks
    fn chunk_spans(&self, text: &str) -> Vec<(usize, usize)> {
        let mut splits = Vec::new();
        self.split_recursive(text, 0, 0, &mut splits);
        self.merge(text, &splits)
    }

    fn split_recursive(&self, text: &str, offset: usize, level: usize, out: &mut Vec<Split>) {
        let chars = text.chars().count();
        if chars == 0 {
            return;
        }
        if chars <= self.chunk_size {
            out.push(Split { start: offset, end: offset + text.len(), chars });
            return;
        }

        for next_level in level..4 {
            let pieces = pieces_at_level(text, next_level);
            if pieces.len() > 1 {
                for (piece_offset, piece) in pieces {
                    self.split_recursive(piece, offset + piece_offset, next_level + 1, out);
                }
                return;
            }
        }

        // No boundary left: cut by characters.
        let mut start = 0;
        let mut count = 0;
        for (idx, _) in text.char_indices() {
            if count == self.chunk_size {
                out.push(Split { start: offset + start, end: offset + idx, chars: count });
                start = idx;
                count = 0;
            }
            count += 1;
        }
        out.push(Split { start: offset + start, end: offset + text.len(), chars: count });
    }

    fn merge(&self, text: &str, splits: &[Split]) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        let mut current: Vec<Split> = Vec::new();
        let mut current_chars = 0;

        for split in splits {
            if current_chars + split.chars > self.chunk_size && !current.is_empty() {
                push_span(text, &current, &mut spans);

                // Carry trailing splits into the next chunk as overlap.
                let mut overlap = Vec::new();
                let mut overlap_chars = 0;
                for prev in current.iter().rev() {
                    if overlap_chars + prev.chars > self.chunk_overlap {
                        break;
                    }
                    overlap_chars += prev.chars;
                    overlap.push(*prev);
                }
                overlap.reverse();
                current = overlap;
                current_chars = overlap_chars;

                while current_chars + split.chars > self.chunk_size && !current.is_empty() {
                    let removed = current.remove(0);
                    current_chars -= removed.chars;
                }
            }
            current.push(*split);
            current_chars += split.chars;
        }

        if !current.is_empty() {
            push_span(text, &current, &mut spans);
        }
        spans
    }
}

fn push_span(text: &str, current: &[Split], spans: &mut Vec<(usize, usize)>) {
    let (Some(first), Some(last)) = (current.first(), current.last()) else {
        return;
    };
    let raw = &text[first.start..last.end];
    let trimmed_start = raw.len() - raw.trim_start().len();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }
    let start = first.start + trimmed_start;
    let span = (start, start + trimmed.len());
    if spans.last() != Some(&span) {
        spans.push(span);
    }
}

/// Break text at one boundary level, keeping delimiters attached.
///
/// Levels: 0 paragraphs, 1 sentences, 2 clauses, 3 words.
fn pieces_at_level(text: &str, level: usize) -> Vec<(usize, &str)> {
    match level {
        0 => inclusive_pieces(text, text.split_inclusive(PARAGRAPH_SEPARATOR)),
        1 => inclusive_pieces(
            text,
            text.split_inclusive(|c: char| matches!(c, '.' | '!' | '?' | '\n' | '。' | '！' | '？')),
        ),
        2 => clause_regex()
            .find_iter(text)
            .map(|m| (m.start(), m.as_str()))
            .collect(),
        _ => inclusive_pieces(text, text.split_inclusive(char::is_whitespace)),
    }
}

fn inclusive_pieces<'a>(text: &'a str, parts: impl Iterator<Item = &'a str>) -> Vec<(usize, &'a str)> {
    let base = text.as_ptr() as usize;
    parts.map(|p| (p.as_ptr() as usize - base, p)).collect()
}
