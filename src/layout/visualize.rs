//! Debug overlays: the page raster with every final block outlined in a
//! colour per type.

use std::path::{Path, PathBuf};

use image::{ImageFormat, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tracing::debug;

use crate::block::{Block, BlockType};
use crate::error::IngestError;
use crate::layout::RenderedPage;

/// Outline thickness in pixels.
const STROKE: i32 = 3;

fn colour(block_type: BlockType) -> Rgb<u8> {
    match block_type {
        BlockType::Handwriting | BlockType::HandwritingRegion => Rgb([255, 0, 0]),
        BlockType::Table => Rgb([0, 0, 255]),
        BlockType::Title => Rgb([255, 165, 0]),
        BlockType::Image => Rgb([255, 0, 255]),
        _ => Rgb([0, 160, 0]),
    }
}

/// Write `annotated_page_{n}.png` into `out_dir` and return its path.
pub async fn annotate_page(page: &RenderedPage, blocks: &[Block], out_dir: &Path) -> Result<PathBuf, IngestError> {
    let raster = page.raster.clone();
    let target = out_dir.join(format!("annotated_page_{}.png", page.page));
    let boxes: Vec<_> = blocks.iter().map(|b| (b.bbox, colour(b.block_type))).collect();
    let out = target.clone();

    tokio::task::spawn_blocking(move || {
        let mut canvas = image::open(&raster)
            .map_err(|e| IngestError::ImageDecodeFailed {
                path: raster.clone(),
                detail: e.to_string(),
            })?
            .to_rgb8();
        for (bbox, rgb) in boxes {
            for inset in 0..STROKE {
                let w = bbox.width().round() as i32 - 2 * inset;
                let h = bbox.height().round() as i32 - 2 * inset;
                if w <= 0 || h <= 0 {
                    break;
                }
                let rect = Rect::at(bbox.x0.round() as i32 + inset, bbox.y0.round() as i32 + inset)
                    .of_size(w as u32, h as u32);
                draw_hollow_rect_mut(&mut canvas, rect, rgb);
            }
        }
        canvas
            .save_with_format(&out, ImageFormat::Png)
            .map_err(|e| IngestError::OutputWriteFailed {
                path: out.clone(),
                source: std::io::Error::other(e.to_string()),
            })
    })
    .await
    .map_err(|e| IngestError::Internal(format!("Annotation task panicked: {e}")))??;

    debug!(page = page.page, path = %target.display(), "Annotated page written");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::geometry::BBox;
    use image::RgbImage;

    #[tokio::test]
    async fn outlines_use_type_colours() {
        let dir = tempfile::tempdir().unwrap();
        let raster = dir.path().join("page_1.png");
        RgbImage::from_pixel(100, 100, Rgb([255, 255, 255])).save(&raster).unwrap();
        let page = RenderedPage {
            page: 1,
            raster,
            width: 100,
            height: 100,
        };
        let blocks = vec![
            Block::new(
                BlockType::Table,
                BBox::new(10.0, 10.0, 50.0, 50.0),
                crate::block::BlockAction::ExtractTableLogic,
                "",
            ),
            Block::text(BBox::new(60.0, 60.0, 90.0, 90.0), "hello"),
        ];

        let path = annotate_page(&page, &blocks, dir.path()).await.unwrap();
        assert_eq!(path.file_name().unwrap(), "annotated_page_1.png");
        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(*img.get_pixel(10, 10), Rgb([0, 0, 255]));
        assert_eq!(*img.get_pixel(60, 60), Rgb([0, 160, 0]));
        assert_eq!(*img.get_pixel(30, 30), Rgb([255, 255, 255]));
    }

    #[test]
    fn handwriting_is_red() {
        assert_eq!(colour(BlockType::HandwritingRegion), Rgb([255, 0, 0]));
    }
}
