//! Page layout analysis: from a document file to merged, ordered blocks per
//! page.
//!
//! ## Base blocks by format
//!
//! ```text
//! PDF         pdfium text segments + image objects, rescaled to raster px
//! image       baseline recognition over the whole picture
//! pptx/docx   office → PDF, then as PDF
//!             (no converter) structural reconstruction from the package XML
//! ```
//!
//! Rasterised pages then get table and handwriting detections, fetched
//! concurrently since they are different capabilities, and everything goes
//! through [`merge::merge_page`]. Structural pages skip the detectors.
//! Slide shapes still get consecutive merging; document paragraphs are
//! already one block each and keep their own type.
//!
//! The analyzer holds no model state. Detection lives behind the
//! [`LayoutDetectors`] trait; [`WorkerDetectors`] is the production
//! implementation over a [`WorkerPool`].

pub mod geometry;
pub mod merge;
pub mod office;
pub mod pdf;
pub mod structural;
pub mod visualize;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::ImageFormat;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::block::{Block, BlockType};
use crate::cancel::CancelToken;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::output::Stage;
use crate::worker::{Capability, WorkerPool};
use geometry::BBox;
use merge::{assign_ids, merge_consecutive, merge_page, Detection};
use pdf::NativePage;
use structural::OfficeKind;

/// A page raster on disk. Every block bbox on the page is in this image's
/// pixel space.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    /// 1-indexed.
    pub page: usize,
    pub raster: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// A page after merge, ready for enrichment.
#[derive(Debug, Clone)]
pub struct AnalyzedPage {
    pub rendered: RenderedPage,
    pub blocks: Vec<Block>,
}

/// Document formats the analyzer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Image,
    Slides,
    WordProcessor,
}

impl DocumentFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Image => "image",
            DocumentFormat::Slides => "slides",
            DocumentFormat::WordProcessor => "word-processor",
        }
    }
}

// ── Detector seam ────────────────────────────────────────────────────────

/// Model-backed detection over one page raster.
///
/// Implementations swallow their own failures: an unavailable detector is
/// an empty result, never an error.
#[async_trait]
pub trait LayoutDetectors: Send + Sync {
    async fn detect_tables(&self, page: &RenderedPage) -> Vec<Detection>;
    async fn detect_handwriting(&self, page: &RenderedPage) -> Vec<Detection>;
    /// Text lines recognised over the whole page, as base blocks.
    async fn base_recognize(&self, page: &RenderedPage) -> Vec<Block>;
}

/// One line from a recognition reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedText {
    pub bbox: BBox,
    pub text: String,
    pub confidence: Option<f32>,
}

/// Accept `[x0, y0, x1, y1]` or a polygon of `[x, y]` points.
fn parse_bbox(value: &Value) -> Option<BBox> {
    let items = value.as_array()?;
    if items.len() == 4 && items.iter().all(Value::is_number) {
        let n: Vec<f32> = items.iter().filter_map(Value::as_f64).map(|v| v as f32).collect();
        return Some(BBox::new(n[0], n[1], n[2], n[3]));
    }
    let points: Vec<(f32, f32)> = items
        .iter()
        .filter_map(|p| {
            let p = p.as_array()?;
            Some((p.first()?.as_f64()? as f32, p.get(1)?.as_f64()? as f32))
        })
        .collect();
    if points.len() < 2 || points.len() != items.len() {
        return None;
    }
    let (mut x0, mut y0) = (f32::INFINITY, f32::INFINITY);
    let (mut x1, mut y1) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
    for (x, y) in points {
        x0 = x0.min(x);
        y0 = y0.min(y);
        x1 = x1.max(x);
        y1 = y1.max(y);
    }
    Some(BBox::new(x0, y0, x1, y1))
}

fn confidence_of(item: &Value) -> Option<f32> {
    item.get("confidence").and_then(Value::as_f64).map(|c| c as f32)
}

/// Parse a `[{bbox, confidence}]` detector reply. Entries without a usable
/// box are skipped.
pub fn parse_detections(reply: &Value, kind: BlockType, producer: &str) -> Vec<Detection> {
    let Some(items) = reply.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let bbox = parse_bbox(item.get("bbox")?)?;
            let mut detection = Detection::new(kind, bbox, producer);
            detection.confidence = confidence_of(item);
            Some(detection)
        })
        .collect()
}

/// Parse a `[{bbox, text, confidence?}]` recognition reply.
pub fn parse_recognized(reply: &Value) -> Vec<RecognizedText> {
    let Some(items) = reply.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let text = item.get("text")?.as_str()?.trim();
            if text.is_empty() {
                return None;
            }
            Some(RecognizedText {
                bbox: parse_bbox(item.get("bbox")?)?,
                text: text.to_string(),
                confidence: confidence_of(item),
            })
        })
        .collect()
}

/// All recognised text in reply order, one line per item.
pub fn joined_text(items: &[RecognizedText]) -> String {
    items.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join("\n")
}

/// [`LayoutDetectors`] backed by resident worker processes.
#[derive(Debug, Clone)]
pub struct WorkerDetectors {
    pool: Arc<WorkerPool>,
}

impl WorkerDetectors {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self { pool }
    }

    async fn ask(&self, capability: Capability, page: &RenderedPage) -> Option<Value> {
        let payload = Value::String(page.raster.to_string_lossy().into_owned());
        match self.pool.invoke(capability, &payload).await.into_result() {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(%capability, page = page.page, error = %e, "Detector unavailable");
                None
            }
        }
    }

    async fn detect(&self, capability: Capability, kind: BlockType, page: &RenderedPage) -> Vec<Detection> {
        self.ask(capability, page)
            .await
            .map(|v| parse_detections(&v, kind, capability.wire_name()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl LayoutDetectors for WorkerDetectors {
    async fn detect_tables(&self, page: &RenderedPage) -> Vec<Detection> {
        self.detect(Capability::DetectTables, BlockType::Table, page).await
    }

    async fn detect_handwriting(&self, page: &RenderedPage) -> Vec<Detection> {
        self.detect(Capability::DetectHandwriting, BlockType::HandwritingRegion, page)
            .await
    }

    async fn base_recognize(&self, page: &RenderedPage) -> Vec<Block> {
        let Some(reply) = self.ask(Capability::RecognizeText, page).await else {
            return Vec::new();
        };
        parse_recognized(&reply)
            .into_iter()
            .map(|t| {
                let block = Block::text(t.bbox, t.text);
                match t.confidence {
                    Some(c) => block.with_confidence(c),
                    None => block,
                }
            })
            .collect()
    }
}

// ── Analyzer ─────────────────────────────────────────────────────────────

/// Turns one document into merged pages.
pub struct LayoutAnalyzer<'a> {
    config: &'a IngestConfig,
    detectors: &'a dyn LayoutDetectors,
    annotate_dir: Option<PathBuf>,
}

impl<'a> LayoutAnalyzer<'a> {
    pub fn new(config: &'a IngestConfig, detectors: &'a dyn LayoutDetectors) -> Self {
        Self {
            config,
            detectors,
            annotate_dir: None,
        }
    }

    /// Write `annotated_page_{n}.png` overlays into `dir`.
    pub fn with_annotations(mut self, dir: impl Into<PathBuf>) -> Self {
        self.annotate_dir = Some(dir.into());
        self
    }

    /// Produce merged pages for `source`. Page rasters land in `work_dir`,
    /// which must outlive enrichment.
    pub async fn analyze(
        &self,
        source: &Path,
        format: DocumentFormat,
        work_dir: &Path,
        cancel: &CancelToken,
    ) -> Result<Vec<AnalyzedPage>, IngestError> {
        let (pages, treatment) = self.base_pages(source, format, work_dir).await?;
        info!(format = format.as_str(), pages = pages.len(), ?treatment, "Base blocks ready");

        let mut analyzed = Vec::with_capacity(pages.len());
        for (rendered, base) in pages {
            cancel.check(Stage::AnalyzingLayout)?;
            let blocks = match treatment {
                BaseTreatment::Detect => {
                    let (tables, handwriting) = futures::join!(
                        self.detectors.detect_tables(&rendered),
                        self.detectors.detect_handwriting(&rendered)
                    );
                    merge_page(rendered.page, &base, &tables, &handwriting, &self.config.merge)
                }
                BaseTreatment::MergeConsecutive => {
                    let base: Vec<Block> = base.into_iter().filter(|b| !b.bbox.is_degenerate()).collect();
                    let mut merged = merge_consecutive(base, self.config.merge.vertical_gap);
                    assign_ids(rendered.page, &mut merged);
                    merged
                }
                BaseTreatment::AsIs => {
                    let mut kept: Vec<Block> = base.into_iter().filter(|b| !b.bbox.is_degenerate()).collect();
                    assign_ids(rendered.page, &mut kept);
                    kept
                }
            };

            if let Some(dir) = &self.annotate_dir {
                if let Err(e) = visualize::annotate_page(&rendered, &blocks, dir).await {
                    warn!(page = rendered.page, error = %e, "Could not write annotated page");
                }
            }
            analyzed.push(AnalyzedPage { rendered, blocks });
        }
        Ok(analyzed)
    }

    /// Base blocks per page, and how they get merged.
    async fn base_pages(
        &self,
        source: &Path,
        format: DocumentFormat,
        work_dir: &Path,
    ) -> Result<(Vec<NativePage>, BaseTreatment), IngestError> {
        match format {
            DocumentFormat::Pdf => Ok((pdf::extract_pages(source, work_dir, self.config).await?, BaseTreatment::Detect)),
            DocumentFormat::Image => {
                let rendered = load_image(source, work_dir).await?;
                let base = self.detectors.base_recognize(&rendered).await;
                Ok((vec![(rendered, base)], BaseTreatment::Detect))
            }
            DocumentFormat::Slides | DocumentFormat::WordProcessor => {
                if let Some(program) = &self.config.office_program {
                    match office::convert_to_pdf(program, source, work_dir, self.config.external_timeout).await {
                        Ok(pdf_path) => {
                            let pages = pdf::extract_pages(&pdf_path, work_dir, self.config).await?;
                            return Ok((pages, BaseTreatment::Detect));
                        }
                        Err(e) => warn!(error = %e, "Office conversion unavailable, using structural fallback"),
                    }
                }
                let (kind, treatment) = if format == DocumentFormat::Slides {
                    (OfficeKind::Slides, BaseTreatment::MergeConsecutive)
                } else {
                    (OfficeKind::WordProcessor, BaseTreatment::AsIs)
                };
                Ok((structural::reconstruct(source, kind, work_dir).await?, treatment))
            }
        }
    }
}

/// What happens to a page's base blocks before enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BaseTreatment {
    /// Run the detectors and the full merge.
    Detect,
    /// Only fold vertically adjacent blocks of the same type.
    MergeConsecutive,
    /// Keep every block; only assign ids.
    AsIs,
}

/// Decode a flat image and store it as the PNG raster of page 1.
async fn load_image(source: &Path, work_dir: &Path) -> Result<RenderedPage, IngestError> {
    let path = source.to_path_buf();
    let raster = work_dir.join("page_1.png");
    tokio::task::spawn_blocking(move || {
        let failed = |detail: String| IngestError::ImageDecodeFailed {
            path: path.clone(),
            detail,
        };
        let img = image::open(&path).map_err(|e| failed(e.to_string()))?;
        img.save_with_format(&raster, ImageFormat::Png)
            .map_err(|e| failed(format!("write {}: {e}", raster.display())))?;
        Ok(RenderedPage {
            page: 1,
            raster,
            width: img.width(),
            height: img.height(),
        })
    })
    .await
    .map_err(|e| IngestError::Internal(format!("Image task panicked: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use serde_json::json;

    #[test]
    fn bbox_accepts_corners_and_polygons() {
        assert_eq!(parse_bbox(&json!([1, 2, 3, 4])), Some(BBox::new(1.0, 2.0, 3.0, 4.0)));
        assert_eq!(
            parse_bbox(&json!([[10, 5], [40, 5], [40, 25], [10, 25]])),
            Some(BBox::new(10.0, 5.0, 40.0, 25.0))
        );
        assert_eq!(parse_bbox(&json!("nope")), None);
        assert_eq!(parse_bbox(&json!([1, 2, 3])), None);
    }

    #[test]
    fn detections_skip_entries_without_boxes() {
        let reply = json!([
            {"bbox": [0, 0, 200, 200], "confidence": 0.9},
            {"confidence": 0.5},
        ]);
        let hits = parse_detections(&reply, BlockType::Table, "detect-tables");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].confidence, Some(0.9));
        assert_eq!(hits[0].kind, BlockType::Table);
        assert!(parse_detections(&json!({"error": "x"}), BlockType::Table, "t").is_empty());
    }

    #[test]
    fn recognized_text_drops_blank_lines_and_joins() {
        let reply = json!([
            {"bbox": [0, 0, 10, 10], "type": "text", "text": " Total ", "confidence": 0.8},
            {"bbox": [0, 20, 10, 30], "text": "  "},
            {"bbox": [0, 40, 10, 50], "text": "42"},
        ]);
        let items = parse_recognized(&reply);
        assert_eq!(items.len(), 2);
        assert_eq!(joined_text(&items), "Total\n42");
    }

    struct FixedDetectors;

    #[async_trait]
    impl LayoutDetectors for FixedDetectors {
        async fn detect_tables(&self, _page: &RenderedPage) -> Vec<Detection> {
            vec![Detection::new(BlockType::Table, BBox::new(0.0, 0.0, 200.0, 200.0), "test")]
        }
        async fn detect_handwriting(&self, _page: &RenderedPage) -> Vec<Detection> {
            Vec::new()
        }
        async fn base_recognize(&self, _page: &RenderedPage) -> Vec<Block> {
            vec![
                Block::text(BBox::new(10.0, 10.0, 100.0, 30.0), "Q1 Revenue"),
                Block::text(BBox::new(10.0, 400.0, 100.0, 420.0), "Footer"),
            ]
        }
    }

    #[tokio::test]
    async fn image_pages_are_recognised_then_merged() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.jpg");
        RgbImage::from_pixel(300, 500, Rgb([255, 255, 255])).save(&source).unwrap();
        let work = tempfile::tempdir().unwrap();
        let config = IngestConfig::default();

        let analyzer = LayoutAnalyzer::new(&config, &FixedDetectors);
        let pages = analyzer
            .analyze(&source, DocumentFormat::Image, work.path(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(pages.len(), 1);
        let page = &pages[0];
        assert_eq!((page.rendered.width, page.rendered.height), (300, 500));
        assert!(page.rendered.raster.exists());
        assert_eq!(page.blocks.len(), 2);
        assert_eq!(page.blocks[0].block_type, BlockType::Table);
        assert_eq!(page.blocks[0].content, "Q1 Revenue");
        assert_eq!(page.blocks[0].id, "p1-b0");
        assert_eq!(page.blocks[1].content, "Footer");
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_page() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("scan.png");
        RgbImage::from_pixel(10, 10, Rgb([0, 0, 0])).save(&source).unwrap();
        let config = IngestConfig::default();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = LayoutAnalyzer::new(&config, &FixedDetectors)
            .analyze(&source, DocumentFormat::Image, dir.path(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn undecodable_image_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("broken.png");
        std::fs::write(&source, b"not a png").unwrap();
        let config = IngestConfig::default();
        let err = LayoutAnalyzer::new(&config, &FixedDetectors)
            .analyze(&source, DocumentFormat::Image, dir.path(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::ImageDecodeFailed { .. }));
    }

    #[tokio::test]
    async fn structural_document_keeps_headings_apart_from_paragraphs() {
        use std::io::Write;
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("report.docx");
        let xml = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Summary</w:t></w:r></w:p>
            <w:p><w:r><w:t>Sales grew.</w:t></w:r></w:p>
            <w:p><w:r><w:t>Costs fell.</w:t></w:r></w:p>
            </w:body></w:document>"#;
        let mut writer = zip::ZipWriter::new(std::fs::File::create(&source).unwrap());
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap();

        let config = IngestConfig {
            office_program: None,
            ..IngestConfig::default()
        };
        let work = tempfile::tempdir().unwrap();
        let pages = LayoutAnalyzer::new(&config, &FixedDetectors)
            .analyze(&source, DocumentFormat::WordProcessor, work.path(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(pages.len(), 1);
        let blocks = &pages[0].blocks;
        let types: Vec<BlockType> = blocks.iter().map(|b| b.block_type).collect();
        assert_eq!(types, vec![BlockType::Title, BlockType::Text, BlockType::Text]);
        assert_eq!(blocks[0].content, "Summary");
        assert_eq!(blocks[2].content, "Costs fell.");
        assert_eq!(blocks[2].id, "p1-b2");
    }
}
