//! Reconcile independent detector outputs into one ordered block list.
//!
//! ## Why a fixed four-step order?
//!
//! Each detector sees the page in isolation: the native text layer (or the
//! baseline recogniser) yields small runs, the table detector yields large
//! rectangles that swallow many of those runs, and the handwriting detector
//! yields regions that often duplicate printed text. Resolving them in a
//! fixed order keeps the result deterministic:
//!
//! ```text
//! 1. tables      absorb every base block they mostly contain
//! 2. remainder   unabsorbed base blocks pass through
//! 3. handwriting kept only where nothing else already sits
//! 4. consecutive vertically adjacent compatible blocks are joined
//! ```
//!
//! Everything here is a pure function over block lists. Degenerate boxes are
//! dropped on entry so no score ever divides by zero.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::{Block, BlockAction, BlockType, EMPTY_TABLE, HANDWRITING_IMAGE};
use crate::layout::geometry::{containment, intersection_over_union, BBox};

/// Tunable cut-offs for [`merge_page`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MergeThresholds {
    /// A base block belongs to a table when more than this share of its
    /// area lies inside the table box.
    pub table_containment: f32,
    /// A handwriting region is dropped when its IoU with an existing block
    /// exceeds this.
    pub handwriting_iou: f32,
    /// Blocks closer than this many pixels vertically may be joined.
    pub vertical_gap: f32,
}

impl Default for MergeThresholds {
    fn default() -> Self {
        Self {
            table_containment: 0.5,
            handwriting_iou: 0.2,
            vertical_gap: 50.0,
        }
    }
}

/// A transient detector hit, consumed once by the merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub kind: BlockType,
    pub bbox: BBox,
    pub confidence: Option<f32>,
    /// Capability that produced the hit, for logging.
    pub producer: String,
}

impl Detection {
    pub fn new(kind: BlockType, bbox: BBox, producer: impl Into<String>) -> Self {
        Self {
            kind,
            bbox,
            confidence: None,
            producer: producer.into(),
        }
    }
}

// ── Step 1: tables ───────────────────────────────────────────────────────

/// One table block per detection, absorbing every base block whose
/// containment in the table exceeds `threshold`.
///
/// Returns the table blocks and the indices of the consumed base blocks.
/// Absorbed text is ordered top-to-bottom then left-to-right and joined with
/// newlines. A table with no text inside gets [`EMPTY_TABLE`].
pub fn merge_table_detections(
    base: &[Block],
    tables: &[Detection],
    threshold: f32,
) -> (Vec<Block>, HashSet<usize>) {
    let mut consumed = HashSet::new();
    let mut out = Vec::with_capacity(tables.len());

    for table in tables {
        let mut inside: Vec<(usize, &Block)> = base
            .iter()
            .enumerate()
            .filter(|(_, b)| containment(&table.bbox, &b.bbox) > threshold)
            .collect();
        inside.sort_by(|(_, a), (_, b)| {
            a.bbox
                .y0
                .total_cmp(&b.bbox.y0)
                .then(a.bbox.x0.total_cmp(&b.bbox.x0))
        });

        let text = inside
            .iter()
            .filter(|(_, b)| b.block_type.is_text_like())
            .map(|(_, b)| b.content.trim())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        consumed.extend(inside.iter().map(|(i, _)| *i));

        let content = if text.is_empty() { EMPTY_TABLE.to_string() } else { text };
        let mut block = Block::new(BlockType::Table, table.bbox, BlockAction::ExtractTableLogic, content);
        block.confidence = table.confidence;
        out.push(block);
    }

    (out, consumed)
}

// ── Step 2: remainder ────────────────────────────────────────────────────

/// Base blocks not absorbed by a table, as standalone blocks.
///
/// Images are marked for cropping; everything else keeps its text.
pub fn assign_remaining_blocks(base: &[Block], consumed: &HashSet<usize>) -> Vec<Block> {
    base.iter()
        .enumerate()
        .filter(|(i, _)| !consumed.contains(i))
        .map(|(_, b)| {
            let mut block = b.clone();
            block.action = if b.block_type == BlockType::Image {
                BlockAction::CropImage
            } else {
                BlockAction::ExtractText
            };
            block
        })
        .collect()
}

// ── Step 3: handwriting ──────────────────────────────────────────────────

/// Append every handwriting detection whose IoU against each block already
/// in `final_blocks` is at most `max_iou`.
///
/// Regions accepted earlier in the same pass count as existing blocks, so
/// two overlapping handwriting hits keep only the first.
pub fn isolate_handwriting(detections: &[Detection], final_blocks: &mut Vec<Block>, max_iou: f32) {
    for hw in detections {
        let overlapping = final_blocks
            .iter()
            .any(|b| intersection_over_union(&hw.bbox, &b.bbox) > max_iou);
        if overlapping {
            debug!(bbox = ?hw.bbox, "Handwriting region overlaps existing block, dropped");
            continue;
        }
        let mut block = Block::new(
            BlockType::HandwritingRegion,
            hw.bbox,
            BlockAction::SendToOcr,
            HANDWRITING_IMAGE,
        );
        block.confidence = hw.confidence;
        final_blocks.push(block);
    }
}

// ── Step 4: consecutive merge ────────────────────────────────────────────

/// Stable-sort by top edge, then fold each block into its predecessor when
/// the vertical gap is below `max_gap` and the two are compatible (both
/// text-like, or the same type).
///
/// The merged box is the union, the content is joined with a newline. A
/// text+title pair becomes text; every other merge keeps its type. Running
/// it twice gives the same result as running it once.
pub fn merge_consecutive(blocks: Vec<Block>, max_gap: f32) -> Vec<Block> {
    let mut sorted = blocks;
    sorted.sort_by(|a, b| a.bbox.y0.total_cmp(&b.bbox.y0));

    let mut out: Vec<Block> = Vec::with_capacity(sorted.len());
    for next in sorted {
        let Some(current) = out.last_mut() else {
            out.push(next);
            continue;
        };

        let text_pair = current.block_type.is_text_like() && next.block_type.is_text_like();
        let same_type = current.block_type == next.block_type;
        let gap = next.bbox.y0 - current.bbox.y1;

        if gap < max_gap && (text_pair || same_type) {
            current.bbox = current.bbox.union(&next.bbox);
            current.content.push('\n');
            current.content.push_str(&next.content);
            if !same_type {
                current.block_type = BlockType::Text;
            }
            current.confidence = match (current.confidence, next.confidence) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        } else {
            out.push(next);
        }
    }
    out
}

// ── Whole page ───────────────────────────────────────────────────────────

/// Run the four merge steps in order and assign positional ids.
pub fn merge_page(
    page: usize,
    base: &[Block],
    tables: &[Detection],
    handwriting: &[Detection],
    thresholds: &MergeThresholds,
) -> Vec<Block> {
    let base: Vec<Block> = base.iter().filter(|b| !b.bbox.is_degenerate()).cloned().collect();
    let tables: Vec<Detection> = tables.iter().filter(|d| !d.bbox.is_degenerate()).cloned().collect();
    let handwriting: Vec<Detection> = handwriting
        .iter()
        .filter(|d| !d.bbox.is_degenerate())
        .cloned()
        .collect();

    let (mut blocks, consumed) = merge_table_detections(&base, &tables, thresholds.table_containment);
    blocks.extend(assign_remaining_blocks(&base, &consumed));
    isolate_handwriting(&handwriting, &mut blocks, thresholds.handwriting_iou);

    let mut merged = merge_consecutive(blocks, thresholds.vertical_gap);
    assign_ids(page, &mut merged);
    debug!(
        page,
        base = base.len(),
        tables = tables.len(),
        handwriting = handwriting.len(),
        merged = merged.len(),
        "Page merged"
    );
    merged
}

/// Positional ids `p{page}-b{index}`.
pub fn assign_ids(page: usize, blocks: &mut [Block]) {
    for (i, b) in blocks.iter_mut().enumerate() {
        b.id = format!("p{page}-b{i}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(bbox: BBox) -> Detection {
        Detection::new(BlockType::Table, bbox, "detect-tables")
    }

    fn hw(bbox: BBox) -> Detection {
        Detection::new(BlockType::Handwriting, bbox, "detect-handwriting")
    }

    #[test]
    fn adjacent_lines_merge_into_one_text_block() {
        let base = vec![
            Block::text(BBox::new(0.0, 0.0, 100.0, 20.0), "Hello"),
            Block::text(BBox::new(0.0, 25.0, 100.0, 45.0), "World"),
        ];
        let out = merge_page(1, &base, &[], &[], &MergeThresholds::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].block_type, BlockType::Text);
        assert_eq!(out[0].bbox, BBox::new(0.0, 0.0, 100.0, 45.0));
        assert_eq!(out[0].content, "Hello\nWorld");
        assert_eq!(out[0].id, "p1-b0");
    }

    #[test]
    fn table_absorbs_contained_text() {
        let base = vec![Block::text(BBox::new(10.0, 10.0, 50.0, 30.0), "Q1 Revenue")];
        let tables = vec![table(BBox::new(0.0, 0.0, 200.0, 200.0))];
        let out = merge_page(1, &base, &tables, &[], &MergeThresholds::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].block_type, BlockType::Table);
        assert_eq!(out[0].content, "Q1 Revenue");
        assert_eq!(out[0].action, BlockAction::ExtractTableLogic);
    }

    #[test]
    fn table_text_is_ordered_top_then_left() {
        let base = vec![
            Block::text(BBox::new(100.0, 50.0, 150.0, 60.0), "d"),
            Block::text(BBox::new(10.0, 10.0, 50.0, 20.0), "a"),
            Block::text(BBox::new(10.0, 50.0, 50.0, 60.0), "c"),
            Block::text(BBox::new(100.0, 10.0, 150.0, 20.0), "b"),
        ];
        let (tables, consumed) =
            merge_table_detections(&base, &[table(BBox::new(0.0, 0.0, 200.0, 200.0))], 0.5);
        assert_eq!(tables[0].content, "a\nb\nc\nd");
        assert_eq!(consumed.len(), 4);
    }

    #[test]
    fn table_without_text_is_empty_table() {
        let tables = vec![table(BBox::new(0.0, 0.0, 200.0, 200.0))];
        let out = merge_page(1, &[], &tables, &[], &MergeThresholds::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, EMPTY_TABLE);
    }

    #[test]
    fn half_contained_block_stays_outside() {
        // Exactly half inside: containment 0.5 is not > 0.5.
        let base = vec![Block::text(BBox::new(150.0, 0.0, 250.0, 10.0), "edge")];
        let (tables, consumed) =
            merge_table_detections(&base, &[table(BBox::new(0.0, 0.0, 200.0, 200.0))], 0.5);
        assert!(consumed.is_empty());
        assert_eq!(tables[0].content, EMPTY_TABLE);
        let rest = assign_remaining_blocks(&base, &consumed);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].action, BlockAction::ExtractText);
    }

    #[test]
    fn remaining_images_are_cropped() {
        let base = vec![Block::new(
            BlockType::Image,
            BBox::new(0.0, 0.0, 10.0, 10.0),
            BlockAction::ExtractText,
            "[IMAGE_BINARY]",
        )];
        let rest = assign_remaining_blocks(&base, &HashSet::new());
        assert_eq!(rest[0].action, BlockAction::CropImage);
    }

    #[test]
    fn handwriting_above_threshold_is_dropped() {
        // IoU of these two is 50/150 = 0.333.
        let mut blocks = vec![Block::text(BBox::new(0.0, 0.0, 10.0, 10.0), "printed")];
        isolate_handwriting(&[hw(BBox::new(5.0, 0.0, 15.0, 10.0))], &mut blocks, 0.2);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn handwriting_at_threshold_is_kept() {
        // inter 20, union 100 -> exactly 0.2.
        let mut blocks = vec![Block::text(BBox::new(0.0, 0.0, 10.0, 6.0), "printed")];
        isolate_handwriting(&[hw(BBox::new(0.0, 4.0, 10.0, 10.0))], &mut blocks, 0.2);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].block_type, BlockType::HandwritingRegion);
        assert_eq!(blocks[1].action, BlockAction::SendToOcr);
        assert_eq!(blocks[1].content, HANDWRITING_IMAGE);
    }

    #[test]
    fn handwriting_checks_regions_accepted_earlier() {
        let mut blocks = Vec::new();
        let first = hw(BBox::new(0.0, 0.0, 100.0, 100.0));
        let dup = hw(BBox::new(5.0, 5.0, 100.0, 100.0));
        isolate_handwriting(&[first, dup], &mut blocks, 0.2);
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn merge_consecutive_is_idempotent() {
        let blocks = vec![
            Block::title(BBox::new(0.0, 0.0, 300.0, 30.0), "Heading"),
            Block::text(BBox::new(0.0, 40.0, 300.0, 60.0), "body one"),
            Block::image(BBox::new(0.0, 200.0, 300.0, 400.0)),
            Block::text(BBox::new(0.0, 420.0, 300.0, 440.0), "caption"),
            Block::text(BBox::new(0.0, 600.0, 300.0, 620.0), "far away"),
        ];
        let once = merge_consecutive(blocks, 50.0);
        let twice = merge_consecutive(once.clone(), 50.0);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 4);
        assert_eq!(once[0].block_type, BlockType::Text);
        assert_eq!(once[0].content, "Heading\nbody one");
    }

    #[test]
    fn tables_never_merge_into_text() {
        let blocks = vec![
            Block::new(
                BlockType::Table,
                BBox::new(0.0, 0.0, 100.0, 100.0),
                BlockAction::ExtractTableLogic,
                "a | b",
            ),
            Block::text(BBox::new(0.0, 105.0, 100.0, 120.0), "after"),
        ];
        let out = merge_consecutive(blocks, 50.0);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].block_type, BlockType::Table);
    }

    #[test]
    fn titles_stay_titles_when_merged_together() {
        let blocks = vec![
            Block::title(BBox::new(0.0, 0.0, 100.0, 20.0), "Part"),
            Block::title(BBox::new(0.0, 22.0, 100.0, 42.0), "One"),
        ];
        let out = merge_consecutive(blocks, 50.0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].block_type, BlockType::Title);
    }

    #[test]
    fn degenerate_inputs_are_ignored() {
        let base = vec![
            Block::text(BBox::new(0.0, 0.0, 0.0, 10.0), "zero width"),
            Block::text(BBox::new(0.0, 0.0, 10.0, 10.0), "ok"),
        ];
        let tables = vec![table(BBox::new(5.0, 5.0, 5.0, 5.0))];
        let out = merge_page(2, &base, &tables, &[], &MergeThresholds::default());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "ok");
        assert_eq!(out[0].id, "p2-b0");
    }

    #[test]
    fn empty_page_yields_no_blocks() {
        assert!(merge_page(1, &[], &[], &[], &MergeThresholds::default()).is_empty());
    }
}
