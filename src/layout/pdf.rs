//! Native PDF pages: rasterise each page and lift its text and image runs
//! into raster space.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which keeps thread-local
//! state and blocks for the whole render. The work runs on the blocking pool
//! so Tokio worker threads keep servicing the worker pipes meanwhile.
//!
//! ## Coordinate spaces
//!
//! pdfium reports bounds in PDF points with a bottom-left origin. Blocks live
//! in raster pixels with a top-left origin, so every box is flipped against
//! the page height and scaled by `raster size / page size` per axis.

use std::path::{Path, PathBuf};

use image::ImageFormat;
use pdfium_render::prelude::*;
use tracing::{debug, info};

use crate::block::Block;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::layout::geometry::BBox;
use crate::layout::RenderedPage;

/// Image runs covering more than this share of the page are backgrounds.
const MAX_IMAGE_PAGE_SHARE: f32 = 0.8;

/// Text segments taller than this many points are titles.
const TITLE_MIN_HEIGHT_PT: f32 = 16.0;

/// A rendered page with its native base blocks.
pub type NativePage = (RenderedPage, Vec<Block>);

/// Render every page of `pdf_path` into `work_dir` and extract base blocks.
pub async fn extract_pages(
    pdf_path: &Path,
    work_dir: &Path,
    config: &IngestConfig,
) -> Result<Vec<NativePage>, IngestError> {
    let path = pdf_path.to_path_buf();
    let out_dir = work_dir.to_path_buf();
    let dpi = config.dpi;
    let max_pixels = config.max_rendered_pixels;
    let password = config.password.clone();
    let lib_path = config.pdfium_lib_path.clone();

    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium(lib_path.as_deref())?;
        extract_pages_blocking(&pdfium, &path, &out_dir, dpi, max_pixels, password.as_deref())
    })
    .await
    .map_err(|e| IngestError::Internal(format!("Render task panicked: {e}")))?
}

/// Bind pdfium from `lib_path` (a directory or the library file itself),
/// then `PDFIUM_LIB_PATH`, then the working directory, then the system.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, IngestError> {
    let configured = lib_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

    let candidate = match configured {
        Some(p) if p.is_dir() => Pdfium::pdfium_platform_library_name_at_path(&p),
        Some(p) => p,
        None => Pdfium::pdfium_platform_library_name_at_path("./"),
    };

    let bindings = Pdfium::bind_to_library(&candidate)
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| IngestError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn extract_pages_blocking(
    pdfium: &Pdfium,
    pdf_path: &Path,
    out_dir: &Path,
    dpi: u32,
    max_pixels: u32,
    password: Option<&str>,
) -> Result<Vec<NativePage>, IngestError> {
    let document = pdfium
        .load_pdf_from_file(pdf_path, password)
        .map_err(|e| IngestError::CorruptPdf {
            path: pdf_path.to_path_buf(),
            detail: format!("{e:?}"),
        })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    info!("PDF loaded: {} pages", total);

    let mut out = Vec::with_capacity(total);
    for (idx, page) in pages.iter().enumerate() {
        let number = idx + 1;
        let rendered = render_page(&page, number, out_dir, dpi, max_pixels)?;
        let blocks = native_blocks(&page, &rendered).map_err(|detail| IngestError::RasterisationFailed {
            page: number,
            detail,
        })?;
        debug!(
            "Page {} → {}x{} px, {} base blocks",
            number,
            rendered.width,
            rendered.height,
            blocks.len()
        );
        out.push((rendered, blocks));
    }
    Ok(out)
}

/// Target raster size for a page: `dpi` scaling, longest edge capped.
pub(crate) fn raster_size(width_pt: f32, height_pt: f32, dpi: u32, max_pixels: u32) -> (u32, u32) {
    let mut scale = dpi as f32 / 72.0;
    let longest = width_pt.max(height_pt) * scale;
    if longest > max_pixels as f32 {
        scale *= max_pixels as f32 / longest;
    }
    let w = (width_pt * scale).round().max(1.0) as u32;
    let h = (height_pt * scale).round().max(1.0) as u32;
    (w, h)
}

fn render_page(
    page: &PdfPage,
    number: usize,
    out_dir: &Path,
    dpi: u32,
    max_pixels: u32,
) -> Result<RenderedPage, IngestError> {
    let failed = |detail: String| IngestError::RasterisationFailed { page: number, detail };
    let (w, h) = raster_size(page.width().value, page.height().value, dpi, max_pixels);

    let render_config = PdfRenderConfig::new()
        .set_target_width(w as i32)
        .set_target_height(h as i32)
        .render_form_data(true)
        .render_annotations(true);
    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| failed(format!("{e:?}")))?;
    let image = bitmap.as_image();

    let raster = out_dir.join(format!("page_{number}.png"));
    image
        .save_with_format(&raster, ImageFormat::Png)
        .map_err(|e| failed(format!("write {}: {e}", raster.display())))?;

    Ok(RenderedPage {
        page: number,
        raster,
        width: image.width(),
        height: image.height(),
    })
}

/// Convert a bottom-left-origin rectangle in points to raster pixels.
pub(crate) fn to_raster(
    left: f32,
    bottom: f32,
    right: f32,
    top: f32,
    page_w: f32,
    page_h: f32,
    raster: &RenderedPage,
) -> BBox {
    let sx = raster.width as f32 / page_w;
    let sy = raster.height as f32 / page_h;
    BBox::new(left, page_h - top, right, page_h - bottom)
        .scale(sx, sy)
        .clamp_to(raster.width as f32, raster.height as f32)
}

fn native_blocks(page: &PdfPage, raster: &RenderedPage) -> Result<Vec<Block>, String> {
    let page_w = page.width().value;
    let page_h = page.height().value;
    if page_w <= 0.0 || page_h <= 0.0 {
        return Err(format!("page has no area ({page_w}x{page_h} pt)"));
    }
    let page_area = raster.width as f32 * raster.height as f32;
    let mut blocks = Vec::new();

    let text = page.text().map_err(|e| format!("text layer: {e:?}"))?;
    for segment in text.segments().iter() {
        let content = segment.text();
        let content = content.trim();
        if content.is_empty() {
            continue;
        }
        let b = segment.bounds();
        let (left, bottom, right, top) = (b.left().value, b.bottom().value, b.right().value, b.top().value);
        let bbox = to_raster(left, bottom, right, top, page_w, page_h, raster);
        if top - bottom > TITLE_MIN_HEIGHT_PT {
            blocks.push(Block::title(bbox, content));
        } else {
            blocks.push(Block::text(bbox, content));
        }
    }

    for object in page.objects().iter() {
        if object.object_type() != PdfPageObjectType::Image {
            continue;
        }
        let Ok(b) = object.bounds() else { continue };
        let bbox = to_raster(
            b.left().value,
            b.bottom().value,
            b.right().value,
            b.top().value,
            page_w,
            page_h,
            raster,
        );
        if bbox.area() / page_area > MAX_IMAGE_PAGE_SHARE {
            debug!(page = raster.page, "Skipping full-page background image");
            continue;
        }
        blocks.push(Block::image(bbox));
    }

    Ok(blocks)
}
