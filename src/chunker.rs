//! Classification-aware semantic chunker.
//!
//! Splits raw document text into retrievable blocks along paragraph and list
//! boundaries, detects bracketed portion markings (`(U)`, `(S//NF)`, ...) at
//! the edges of each block, and falls back to a fixed-size sliding window for
//! blocks too large to embed whole. Every emitted chunk carries a normalized
//! `chunk_classification`, inheriting the document's own classification when
//! no in-text marking is found.

use std::sync::OnceLock;

use regex::Regex;

use crate::classification;
use crate::models::{Chunk, ChunkMetadata, DocumentMetadata};

/// Tuning knobs for block identification and the oversize fallback.
#[derive(Debug, Clone)]
pub struct ChunkerOptions {
    /// Blocks shorter than this many characters are discarded.
    pub min_block_size: usize,
    /// Blocks longer than this are re-split with the sliding window.
    pub max_block_size: usize,
    /// Window size for the oversize fallback splitter.
    pub fallback_chunk_size: usize,
    /// Overlap between consecutive fallback windows.
    pub fallback_overlap: usize,
    /// How many characters at each end of a block to scan for markings.
    pub marking_window: usize,
}

impl Default for ChunkerOptions {
    fn default() -> Self {
        ChunkerOptions {
            min_block_size: 20,
            max_block_size: 2000,
            fallback_chunk_size: 1000,
            fallback_overlap: 200,
            marking_window: 70,
        }
    }
}

/// Marker recorded on fallback sub-chunks so downstream consumers can tell
/// a window boundary from a semantic one.
pub const SPLIT_REASON_OVERSIZE: &str = "oversize_block";

fn list_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Bullet, numbered, or lettered list prefixes.
        Regex::new(r"^(\s*)(?:[-*+•]|\d{1,3}[.)]|[A-Za-z][.)])\s+").unwrap()
    })
}

fn marking_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\(\s*(U|C|S|TS|FOUO)(?:\s*/{1,2}\s*([A-Za-z0-9 ,/\-]+?))?\s*\)").unwrap()
    })
}

/// Split a document into classification-tagged chunks.
///
/// Empty input yields zero chunks. A document with zero qualifying blocks
/// also yields zero chunks — callers treat that as "file skipped", not an
/// error.
pub fn split(text: &str, doc: &DocumentMetadata, opts: &ChunkerOptions) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for (block_index, block) in identify_blocks(text, opts.min_block_size)
        .into_iter()
        .enumerate()
    {
        let chunk_classification = detect_classification(&block, doc, opts.marking_window);

        if block.chars().count() > opts.max_block_size {
            for (sub_index, piece) in
                sliding_windows(&block, opts.fallback_chunk_size, opts.fallback_overlap)
                    .into_iter()
                    .enumerate()
            {
                chunks.push(Chunk {
                    text: piece,
                    metadata: ChunkMetadata::merge(
                        doc,
                        chunk_classification.clone(),
                        block_index,
                        Some(sub_index),
                        Some(SPLIT_REASON_OVERSIZE.to_string()),
                    ),
                });
            }
        } else {
            chunks.push(Chunk {
                text: block,
                metadata: ChunkMetadata::merge(
                    doc,
                    chunk_classification,
                    block_index,
                    None,
                    None,
                ),
            });
        }
    }

    chunks
}

/// Scan lines into semantic blocks.
///
/// A blank line or the start of a new list item ends the current block.
/// Within a list item, lines indented at or beyond the item's content column
/// are continuations; a shallower line starts a new block. Blocks below
/// `min_block_size` characters are discarded.
fn identify_blocks(text: &str, min_block_size: usize) -> Vec<String> {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    // Content column of the list item owning the current block, if any.
    let mut list_indent: Option<usize> = None;

    let flush = |current: &mut Vec<&str>, blocks: &mut Vec<String>| {
        if !current.is_empty() {
            let block = current.join("\n").trim().to_string();
            if block.chars().count() >= min_block_size {
                blocks.push(block);
            }
            current.clear();
        }
    };

    for line in text.lines() {
        if line.trim().is_empty() {
            flush(&mut current, &mut blocks);
            list_indent = None;
            continue;
        }

        if let Some(m) = list_item_re().find(line) {
            flush(&mut current, &mut blocks);
            list_indent = Some(m.as_str().chars().count());
            current.push(line);
            continue;
        }

        if let Some(base) = list_indent {
            let indent = line.chars().take_while(|c| c.is_whitespace()).count();
            if indent < base {
                flush(&mut current, &mut blocks);
                list_indent = None;
            }
        }

        current.push(line);
    }
    flush(&mut current, &mut blocks);

    blocks
}

/// Search the edges of a block for portion markings and return the
/// highest-level one found, normalized. Ties keep the first occurrence;
/// no marking means the block inherits the document classification.
fn detect_classification(block: &str, doc: &DocumentMetadata, window: usize) -> String {
    let chars: Vec<char> = block.chars().collect();
    let head: String = chars.iter().take(window).collect();
    let tail: String = if chars.len() > window {
        chars[chars.len() - window..].iter().collect()
    } else {
        String::new()
    };

    let mut best: Option<(u8, String)> = None;
    for segment in [head.as_str(), tail.as_str()] {
        for cap in marking_re().captures_iter(segment) {
            let base = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
            let raw = match cap.get(2) {
                _ if base.eq_ignore_ascii_case("fouo") => "U//FOUO".to_string(),
                Some(caveat) => format!("{}//{}", base, caveat.as_str()),
                None => base.to_string(),
            };
            let normalized = classification::normalize(Some(&raw));
            let lvl = classification::level(&normalized);
            // Strict comparison keeps the first occurrence on ties.
            if best.as_ref().map(|(b, _)| lvl > *b).unwrap_or(true) {
                best = Some((lvl, normalized));
            }
        }
    }

    best.map(|(_, c)| c)
        .unwrap_or_else(|| classification::normalize(Some(&doc.security_classification)))
}

/// Fixed-size sliding-window re-split for oversize blocks.
fn sliding_windows(block: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = block.chars().collect();
    let step = size.saturating_sub(overlap).max(1);
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + size).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> DocumentMetadata {
        DocumentMetadata {
            document_id: "d1".to_string(),
            original_filename: "memo.txt".to_string(),
            security_classification: "CONFIDENTIAL".to_string(),
            page: None,
        }
    }

    fn opts(min: usize) -> ChunkerOptions {
        ChunkerOptions {
            min_block_size: min,
            ..ChunkerOptions::default()
        }
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(split("", &doc(), &opts(5)).is_empty());
        assert!(split("   \n\n  ", &doc(), &opts(5)).is_empty());
    }

    #[test]
    fn test_two_marked_paragraphs() {
        let text = "(S) Alpha paragraph.\n\n(U) Bravo paragraph.";
        let chunks = split(text, &doc(), &opts(5));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.chunk_classification, "SECRET");
        assert_eq!(chunks[1].metadata.chunk_classification, "UNCLASSIFIED");
        assert_eq!(chunks[0].metadata.semantic_block_index, 0);
        assert_eq!(chunks[1].metadata.semantic_block_index, 1);
    }

    #[test]
    fn test_unmarked_block_inherits_document_classification() {
        let chunks = split("No marking in this paragraph at all.", &doc(), &opts(5));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.chunk_classification, "CONFIDENTIAL");
    }

    #[test]
    fn test_min_block_size_never_violated() {
        let text = "tiny\n\nThis block is comfortably long enough to keep around.";
        let chunks = split(text, &doc(), &opts(20));
        assert_eq!(chunks.len(), 1);
        for c in &chunks {
            assert!(c.text.chars().count() >= 20);
        }
    }

    #[test]
    fn test_highest_marking_wins() {
        let text = "(U) Opening line of the block with more text to pass the minimum. (S//NF) closing";
        let chunks = split(text, &doc(), &opts(5));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.chunk_classification, "SECRET//NOFORN");
    }

    #[test]
    fn test_tie_keeps_first_occurrence() {
        let text = "(S//NF) A block with two same-level markings in its head. (S) again";
        let chunks = split(text, &doc(), &opts(5));
        assert_eq!(chunks[0].metadata.chunk_classification, "SECRET//NOFORN");
    }

    #[test]
    fn test_list_items_become_separate_blocks() {
        let text = "- first item with plenty of text in it\n- second item also has plenty of text\n  and a continuation line under it\n- third item rounding out the list here";
        let chunks = split(text, &doc(), &opts(10));
        assert_eq!(chunks.len(), 3);
        assert!(chunks[1].text.contains("continuation line"));
    }

    #[test]
    fn test_paragraph_after_list_item_is_new_block() {
        let text = "- a list item that is long enough to keep\nBack to a plain paragraph that stands alone here.";
        let chunks = split(text, &doc(), &opts(10));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].text.starts_with("Back to a plain paragraph"));
    }

    #[test]
    fn test_oversize_fallback_inherits_and_indexes() {
        let long = format!("(S) {}", "x".repeat(3000));
        let o = ChunkerOptions {
            min_block_size: 5,
            max_block_size: 2000,
            fallback_chunk_size: 1000,
            fallback_overlap: 200,
            marking_window: 70,
        };
        let chunks = split(&long, &doc(), &o);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.metadata.chunk_classification, "SECRET");
            assert_eq!(c.metadata.sub_chunk_index, Some(i));
            assert_eq!(c.metadata.semantic_block_index, 0);
            assert_eq!(
                c.metadata.split_reason.as_deref(),
                Some(SPLIT_REASON_OVERSIZE)
            );
        }
    }

    #[test]
    fn test_rejoining_chunks_recovers_block_text() {
        let text = "(S) Alpha paragraph with enough text.\n\n(U) Bravo paragraph with enough text.";
        let chunks = split(text, &doc(), &opts(5));
        let rejoined = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        assert_eq!(rejoined, text.trim());
    }

    #[test]
    fn test_metadata_assembly() {
        let mut d = doc();
        d.page = Some(7);
        let chunks = split("(TS) A block with page metadata attached to it.", &d, &opts(5));
        let m = &chunks[0].metadata;
        assert_eq!(m.document_id, "d1");
        assert_eq!(m.original_filename, "memo.txt");
        assert_eq!(m.source_classification, "CONFIDENTIAL");
        assert_eq!(m.chunk_classification, "TOP SECRET");
        assert_eq!(m.page, Some(7));
        assert!(!m.placeholder);
    }
}
