//! Map a run's `rag_ready_data` to indexable chunks with stable ids.
//!
//! Document blocks become one or more chunks each; tables always stay whole
//! so their rows are never split across two embeddings. Transcripts are
//! packed into windows of roughly `chunk_size` characters keyed by the start
//! time of their first segment.
//!
//! Ids depend only on the file id, the page and the block position, so
//! re-ingesting the same source overwrites rather than duplicates.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::block::{Block, BlockAction, BlockType};
use crate::output::{RagReadyData, TranscriptOrigin, TranscriptRecord};

/// Recursive split boundaries, coarsest first. The empty separator splits
/// between characters and always applies.
const SEPARATORS: [&str; 7] = ["\n\n", "\n", ".", "!", "?", " ", ""];

/// Splitting knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Target maximum chunk length in characters. Default: 1000.
    pub chunk_size: usize,
    /// Characters shared between neighbouring chunks. Default: 200.
    pub chunk_overlap: usize,
    /// Blocks with fewer characters are skipped. Default: 5.
    pub min_chars: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            min_chars: 5,
        }
    }
}

/// One unit handed to the embedding service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(rename = "type")]
    pub chunk_type: String,
    /// `document`, `audio` or `stream`.
    pub source: String,
}

/// Chunk a whole artifact.
pub fn chunk_output(file_id: &str, data: &RagReadyData, options: &ChunkOptions) -> Vec<Chunk> {
    match data {
        RagReadyData::Pages(pages) => pages
            .iter()
            .flat_map(|page| {
                page.blocks
                    .iter()
                    .enumerate()
                    .flat_map(move |(idx, block)| chunk_block(file_id, page.page, idx, block, options))
            })
            .collect(),
        RagReadyData::Transcript(records) => records
            .iter()
            .flat_map(|rec| chunk_transcript(file_id, rec, options))
            .collect(),
    }
}

fn chunk_type(block: &Block) -> &'static str {
    match block.block_type {
        BlockType::Table => "table",
        BlockType::Image => "image_description",
        _ if block.action == BlockAction::VlmDescribed => "image_description",
        BlockType::Handwriting | BlockType::HandwritingRegion => "handwritten_text",
        BlockType::Title => "title",
        _ => "text",
    }
}

fn chunk_block(file_id: &str, page: usize, idx: usize, block: &Block, options: &ChunkOptions) -> Vec<Chunk> {
    let content = block.content.trim();
    if content.chars().count() < options.min_chars {
        return Vec::new();
    }
    let kind = chunk_type(block);
    let pieces = if kind == "table" {
        vec![content.to_string()]
    } else {
        split_text(content, options.chunk_size, options.chunk_overlap)
    };

    pieces
        .into_iter()
        .enumerate()
        .map(|(n, text)| Chunk {
            id: format!("{file_id}_p{page}_b{idx}_{n}"),
            text,
            metadata: ChunkMetadata {
                file_id: file_id.to_string(),
                page: Some(page),
                timestamp: None,
                chunk_type: kind.to_string(),
                source: "document".into(),
            },
        })
        .collect()
}

fn chunk_transcript(file_id: &str, record: &TranscriptRecord, options: &ChunkOptions) -> Vec<Chunk> {
    let source = match record.source {
        TranscriptOrigin::AudioTranscription => "audio",
        TranscriptOrigin::StreamTranscript => "stream",
    };
    let make = |start: f64, text: &str| Chunk {
        id: format!("{file_id}_audio_{start}"),
        text: text.trim().to_string(),
        metadata: ChunkMetadata {
            file_id: file_id.to_string(),
            page: None,
            timestamp: Some(start),
            chunk_type: "audio_transcript".into(),
            source: source.into(),
        },
    };

    let mut chunks = Vec::new();
    let mut window = String::new();
    let mut start = 0.0;
    for seg in &record.segments {
        if window.is_empty() {
            start = seg.start;
        }
        window.push_str(seg.text.trim());
        window.push(' ');
        if window.chars().count() > options.chunk_size {
            chunks.push(make(start, &window));
            window.clear();
        }
    }
    if !window.trim().is_empty() {
        chunks.push(make(start, &window));
    }
    chunks
}

// ── Recursive splitter ───────────────────────────────────────────────────

/// Split `text` into pieces of at most `size` characters where possible,
/// preferring the coarsest separator that occurs, with `overlap`
/// characters carried between neighbours.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    split_recursive(text, &SEPARATORS, size.max(1), overlap.min(size.saturating_sub(1)))
}

fn split_recursive(text: &str, separators: &[&str], size: usize, overlap: usize) -> Vec<String> {
    let pos = separators
        .iter()
        .position(|s| s.is_empty() || text.contains(s))
        .unwrap_or(separators.len().saturating_sub(1));
    let sep = separators.get(pos).copied().unwrap_or("");
    let finer = separators.get(pos + 1..).unwrap_or(&[]);

    let pieces: Vec<String> = if sep.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split_inclusive(sep).map(str::to_string).collect()
    };

    let mut out = Vec::new();
    let mut fitting: Vec<String> = Vec::new();
    for piece in pieces {
        if piece.chars().count() <= size {
            fitting.push(piece);
            continue;
        }
        if !fitting.is_empty() {
            out.extend(merge_pieces(&fitting, size, overlap));
            fitting.clear();
        }
        if finer.is_empty() {
            out.push(piece.trim().to_string());
        } else {
            out.extend(split_recursive(&piece, finer, size, overlap));
        }
    }
    if !fitting.is_empty() {
        out.extend(merge_pieces(&fitting, size, overlap));
    }
    out.retain(|s| !s.is_empty());
    out
}

/// Pack small pieces into windows, keeping up to `overlap` characters of
/// the previous window at the start of the next.
fn merge_pieces(pieces: &[String], size: usize, overlap: usize) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = piece.chars().count();
        if total + len > size && !current.is_empty() {
            let doc: String = current.iter().copied().collect();
            let doc = doc.trim();
            if !doc.is_empty() {
                docs.push(doc.to_string());
            }
            while total > overlap || (total + len > size && total > 0) {
                match current.pop_front() {
                    Some(front) => total -= front.chars().count(),
                    None => break,
                }
            }
        }
        current.push_back(piece);
        total += len;
    }

    let doc: String = current.iter().copied().collect();
    let doc = doc.trim();
    if !doc.is_empty() {
        docs.push(doc.to_string());
    }
    docs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::geometry::BBox;
    use crate::output::{Page, Segment};

    fn bbox() -> BBox {
        BBox::new(0.0, 0.0, 100.0, 20.0)
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_text("Hello world.", 1000, 200), vec!["Hello world."]);
    }

    #[test]
    fn long_text_respects_size_and_overlaps() {
        let sentence = "The quick brown fox jumps over the lazy dog. ";
        let text = sentence.repeat(60);
        let pieces = split_text(&text, 200, 50);
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.chars().count() <= 200, "piece too long: {}", p.len());
        }
        // Neighbouring pieces share some text.
        let tail: String = pieces[0].chars().rev().take(20).collect::<Vec<_>>().into_iter().rev().collect();
        assert!(pieces[1].contains(tail.trim()));
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let text = "x".repeat(25);
        let pieces = split_text(&text, 10, 0);
        assert_eq!(pieces, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn document_chunk_ids_are_positional() {
        let mut table = Block::new(BlockType::Table, bbox(), BlockAction::ExtractTableLogic, "a | b\nc | d");
        table.id = "p2-b1".into();
        let data = RagReadyData::Pages(vec![Page {
            page: 2,
            blocks: vec![
                Block::title(bbox(), "Quarterly report"),
                table,
                Block::text(bbox(), "tiny"),
            ],
        }]);
        let chunks = chunk_output("doc42", &data, &ChunkOptions::default());
        let ids: Vec<_> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["doc42_p2_b0_0", "doc42_p2_b1_0"]);
        assert_eq!(chunks[0].metadata.chunk_type, "title");
        assert_eq!(chunks[1].metadata.chunk_type, "table");
        assert_eq!(chunks[1].metadata.page, Some(2));
    }

    #[test]
    fn described_images_and_handwriting_get_their_types() {
        let mut described = Block::image(bbox());
        described.action = BlockAction::VlmDescribed;
        described.content = "[IMAGE_DESCRIPTION]\nA bar chart".into();
        let hw = Block::new(BlockType::HandwritingRegion, bbox(), BlockAction::OcrExtracted, "signed J. Doe");
        assert_eq!(chunk_type(&described), "image_description");
        assert_eq!(chunk_type(&hw), "handwritten_text");
    }

    #[test]
    fn transcripts_are_windowed_by_start_time() {
        let segments: Vec<Segment> = (0..30)
            .map(|i| Segment {
                start: i as f64 * 2.0,
                end: i as f64 * 2.0 + 2.0,
                text: "word ".repeat(10),
            })
            .collect();
        let rec = TranscriptRecord {
            source: TranscriptOrigin::AudioTranscription,
            file_name: "talk.wav".into(),
            language: None,
            duration: None,
            url: None,
            stream_id: None,
            segments,
        };
        let options = ChunkOptions {
            chunk_size: 200,
            ..ChunkOptions::default()
        };
        let chunks = chunk_output("f", &RagReadyData::Transcript(vec![rec]), &options);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].id, "f_audio_0");
        assert_eq!(chunks[0].metadata.source, "audio");
        assert_eq!(chunks[0].metadata.timestamp, Some(0.0));
        assert!(chunks[1].metadata.timestamp.unwrap() > 0.0);
    }
}
