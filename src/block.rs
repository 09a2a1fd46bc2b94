//! The typed content block every processing path produces.
//!
//! A [`Block`] carries its region in page-raster pixels, what kind of content
//! it holds ([`BlockType`]) and what was done, or still has to be done, to
//! obtain that content ([`BlockAction`]). `content` is free-form text; a few
//! bracketed sentinels mark content that could not be recovered.

use serde::{Deserialize, Serialize};

use crate::layout::geometry::BBox;

// ── Sentinels ────────────────────────────────────────────────────────────

/// A detected table with no text inside it.
pub const EMPTY_TABLE: &str = "[EMPTY_TABLE]";
/// An image region awaiting description.
pub const IMAGE_BINARY: &str = "[IMAGE_BINARY]";
/// A handwriting region awaiting recognition.
pub const HANDWRITING_IMAGE: &str = "[HANDWRITING_IMAGE]";
/// Table fallback recognition returned nothing.
pub const NO_TEXT_FOUND: &str = "[NO_TEXT_FOUND]";
/// Handwriting recognition returned nothing.
pub const OCR_NO_TEXT_FOUND: &str = "[OCR_NO_TEXT_FOUND]";
/// Prefix of a described image.
pub const IMAGE_DESCRIPTION: &str = "[IMAGE_DESCRIPTION]";

/// Marker shared by every table placeholder a structure worker may emit
/// (`[TABLE_STRUCTURE_NOT_DETECTED]`, `[TABLE_RECONSTRUCTION_FAILED]`, …).
pub(crate) const TABLE_PLACEHOLDER_MARKER: &str = "[TABLE";

/// What a block contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Text,
    Title,
    Image,
    Table,
    Handwriting,
    HandwritingRegion,
    AudioTranscript,
}

impl BlockType {
    /// Text and titles are interchangeable for consecutive merging.
    pub fn is_text_like(self) -> bool {
        matches!(self, BlockType::Text | BlockType::Title)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Title => "title",
            BlockType::Image => "image",
            BlockType::Table => "table",
            BlockType::Handwriting => "handwriting",
            BlockType::HandwritingRegion => "handwriting_region",
            BlockType::AudioTranscript => "audio_transcript",
        }
    }
}

/// How a block's content was (or will be) produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockAction {
    ExtractText,
    CropImage,
    SendToOcr,
    ExtractTableLogic,
    VlmDescribed,
    LocalTableReconstructed,
    TableFallbackOcr,
    OcrExtracted,
}

/// One region of a page with its content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Positional id `p{page}-b{index}`, assigned after merge.
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    pub bbox: BBox,
    pub action: BlockAction,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Block {
    pub fn new(block_type: BlockType, bbox: BBox, action: BlockAction, content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            block_type,
            bbox,
            action,
            content: content.into(),
            confidence: None,
        }
    }

    pub fn text(bbox: BBox, content: impl Into<String>) -> Self {
        Self::new(BlockType::Text, bbox, BlockAction::ExtractText, content)
    }

    pub fn title(bbox: BBox, content: impl Into<String>) -> Self {
        Self::new(BlockType::Title, bbox, BlockAction::ExtractText, content)
    }

    pub fn image(bbox: BBox) -> Self {
        Self::new(BlockType::Image, bbox, BlockAction::CropImage, IMAGE_BINARY)
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// True when the content still needs to be produced by a worker:
    /// empty, or one of the table / image placeholders.
    pub fn is_placeholder(&self) -> bool {
        let c = self.content.trim();
        c.is_empty() || c == EMPTY_TABLE || c == IMAGE_BINARY || c.contains(TABLE_PLACEHOLDER_MARKER)
    }

    /// Text or title with fewer than `min_chars` non-whitespace-trimmed chars.
    pub fn is_low_signal(&self, min_chars: usize) -> bool {
        self.block_type.is_text_like() && self.content.trim().chars().count() < min_chars
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_serialises_with_wire_names() {
        let mut b = Block::new(
            BlockType::HandwritingRegion,
            BBox::new(1.0, 2.0, 3.0, 4.0),
            BlockAction::SendToOcr,
            HANDWRITING_IMAGE,
        );
        b.id = "p1-b0".into();
        let v = serde_json::to_value(&b).unwrap();
        assert_eq!(v["type"], "handwriting_region");
        assert_eq!(v["action"], "send_to_ocr");
        assert_eq!(v["bbox"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        assert!(v.get("confidence").is_none());
    }

    #[test]
    fn placeholder_detection() {
        let bbox = BBox::new(0.0, 0.0, 10.0, 10.0);
        let mut t = Block::new(BlockType::Table, bbox, BlockAction::ExtractTableLogic, EMPTY_TABLE);
        assert!(t.is_placeholder());
        t.content = "[TABLE_STRUCTURE_NOT_DETECTED]".into();
        assert!(t.is_placeholder());
        t.content = "  ".into();
        assert!(t.is_placeholder());
        t.content = "Q1 Revenue".into();
        assert!(!t.is_placeholder());
        assert!(Block::image(bbox).is_placeholder());
    }

    #[test]
    fn low_signal_only_applies_to_text_like() {
        let bbox = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(Block::text(bbox, " a ").is_low_signal(2));
        assert!(!Block::title(bbox, "ab").is_low_signal(2));
        assert!(!Block::image(bbox).is_low_signal(200));
    }
}
