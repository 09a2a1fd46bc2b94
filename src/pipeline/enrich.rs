//! Block enrichment: replace placeholder content with worker output.
//!
//! ## Dispatch
//!
//! ```text
//! table, placeholder content   crop → reconstruct-table
//!                                 ok      → local_table_reconstructed
//!                                 else    → recognize-text → table_fallback_ocr
//!                                                           ([NO_TEXT_FOUND] if empty)
//! image, crop_image            crop → describe-image → vlm_described
//! send_to_ocr                  crop → recognize-text → ocr_extracted
//!                                                      ([OCR_NO_TEXT_FOUND] if empty)
//! anything else                untouched
//! ```
//!
//! A failure on one block never stops the page: the block keeps what it had
//! and the caller logs and counts the [`Recoverable`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use serde_json::Value;
use tracing::debug;

use crate::block::{
    Block, BlockAction, BlockType, IMAGE_DESCRIPTION, NO_TEXT_FOUND, OCR_NO_TEXT_FOUND, TABLE_PLACEHOLDER_MARKER,
};
use crate::error::Recoverable;
use crate::layout::geometry::BBox;
use crate::layout::{joined_text, parse_recognized, RenderedPage};
use crate::pipeline::normalize::{clean_table_markdown, clean_text};
use crate::worker::{Capability, WorkerPool};

/// Which chain a block goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    ReconstructTable,
    DescribeImage,
    Ocr,
}

/// The chain for `block`, if it needs one.
pub fn task_for(block: &Block) -> Option<Task> {
    if block.bbox.is_degenerate() {
        return None;
    }
    match (block.block_type, block.action) {
        (BlockType::Table, _) if block.is_placeholder() => Some(Task::ReconstructTable),
        (BlockType::Image, BlockAction::CropImage) => Some(Task::DescribeImage),
        (_, BlockAction::SendToOcr) => Some(Task::Ocr),
        _ => None,
    }
}

// ── Cropping ─────────────────────────────────────────────────────────────

/// A decoded page raster, shared by the crops of one page.
#[derive(Clone)]
pub struct PageRaster {
    page: usize,
    image: Arc<DynamicImage>,
}

impl PageRaster {
    pub async fn load(rendered: &RenderedPage) -> Result<Self, String> {
        let path = rendered.raster.clone();
        let image = tokio::task::spawn_blocking(move || image::open(&path).map_err(|e| e.to_string()))
            .await
            .map_err(|e| format!("decode task panicked: {e}"))??;
        Ok(Self {
            page: rendered.page,
            image: Arc::new(image),
        })
    }

    /// Cut `bbox` out of the raster into `dir/crop_{tag}.png`.
    pub async fn crop(&self, bbox: BBox, dir: &Path, tag: &str) -> Result<PathBuf, String> {
        let image = Arc::clone(&self.image);
        let target = dir.join(format!("crop_p{}_{}.png", self.page, tag));
        let out = target.clone();
        tokio::task::spawn_blocking(move || {
            let b = bbox.clamp_to(image.width() as f32, image.height() as f32);
            let x = b.x0.floor() as u32;
            let y = b.y0.floor() as u32;
            let w = (b.x1.ceil() as u32).saturating_sub(x);
            let h = (b.y1.ceil() as u32).saturating_sub(y);
            if w == 0 || h == 0 {
                return Err(format!("empty region {bbox:?}"));
            }
            image
                .crop_imm(x, y, w, h)
                .save_with_format(&out, ImageFormat::Png)
                .map_err(|e| format!("write {}: {e}", out.display()))
        })
        .await
        .map_err(|e| format!("crop task panicked: {e}"))??;
        Ok(target)
    }
}

// ── Enricher ─────────────────────────────────────────────────────────────

/// Runs the enrichment chains against a worker pool.
pub struct Enricher<'a> {
    pool: &'a WorkerPool,
    work_dir: &'a Path,
}

impl<'a> Enricher<'a> {
    pub fn new(pool: &'a WorkerPool, work_dir: &'a Path) -> Self {
        Self { pool, work_dir }
    }

    /// Enrich one block in place. `Ok(true)` when its content changed.
    pub async fn enrich(&self, raster: Option<&PageRaster>, block: &mut Block) -> Result<bool, Recoverable> {
        let Some(task) = task_for(block) else {
            return Ok(false);
        };
        let crop_failed = |detail: String| Recoverable::Crop {
            block_id: block.id.clone(),
            detail,
        };
        let raster = raster.ok_or_else(|| crop_failed("page raster unavailable".into()))?;
        let tag = if block.id.is_empty() { "block" } else { block.id.as_str() };
        let crop = raster.crop(block.bbox, self.work_dir, tag).await.map_err(crop_failed)?;
        let payload = Value::String(crop.to_string_lossy().into_owned());

        let result = match task {
            Task::ReconstructTable => self.table_chain(&payload, block).await,
            Task::DescribeImage => self.describe(&payload, block).await,
            Task::Ocr => self.ocr(&payload, block).await,
        };
        if let Err(e) = tokio::fs::remove_file(&crop).await {
            debug!(path = %crop.display(), error = %e, "Crop already gone");
        }
        result
    }

    async fn ask(&self, capability: Capability, payload: &Value, block: &Block) -> Result<Value, Recoverable> {
        self.pool
            .invoke(capability, payload)
            .await
            .into_result()
            .map_err(|source| Recoverable::Worker {
                block_id: block.id.clone(),
                source,
            })
    }

    async fn recognize(&self, payload: &Value, block: &Block) -> Result<String, Recoverable> {
        let reply = self.ask(Capability::RecognizeText, payload, block).await?;
        Ok(clean_text(&joined_text(&parse_recognized(&reply))))
    }

    async fn table_chain(&self, payload: &Value, block: &mut Block) -> Result<bool, Recoverable> {
        if let Ok(reply) = self.ask(Capability::ReconstructTable, payload, block).await {
            let markdown = reply_field(&reply, "markdown").map(|m| clean_table_markdown(&m));
            match markdown {
                Some(m) if !m.is_empty() && !m.contains(&format!("{TABLE_PLACEHOLDER_MARKER}_")) => {
                    block.content = m;
                    block.action = BlockAction::LocalTableReconstructed;
                    return Ok(true);
                }
                _ => debug!(block = %block.id, "Table structure empty, falling back to OCR"),
            }
        }

        let text = self.recognize(payload, block).await?;
        block.content = if text.is_empty() { NO_TEXT_FOUND.to_string() } else { text };
        block.action = BlockAction::TableFallbackOcr;
        Ok(true)
    }

    async fn describe(&self, payload: &Value, block: &mut Block) -> Result<bool, Recoverable> {
        let reply = self.ask(Capability::DescribeImage, payload, block).await?;
        let description = reply_field(&reply, "description")
            .map(|d| clean_text(&d))
            .unwrap_or_default();
        if description.is_empty() {
            return Ok(false);
        }
        block.content = format!("{IMAGE_DESCRIPTION}\n{description}");
        block.action = BlockAction::VlmDescribed;
        Ok(true)
    }

    async fn ocr(&self, payload: &Value, block: &mut Block) -> Result<bool, Recoverable> {
        let text = self.recognize(payload, block).await?;
        if text.is_empty() {
            block.content = OCR_NO_TEXT_FOUND.to_string();
        } else {
            block.content = text;
            block.action = BlockAction::OcrExtracted;
        }
        Ok(true)
    }
}

/// `{key: "..."}` or a bare string reply.
fn reply_field(reply: &Value, key: &str) -> Option<String> {
    match reply {
        Value::String(s) => Some(s.clone()),
        other => other.get(key).and_then(Value::as_str).map(str::to_string),
    }
}
