//! Structural fallback for OOXML packages (`.pptx`, `.docx`).
//!
//! ## Why reconstruct a raster?
//!
//! When no office converter is available the package XML still says where
//! every shape, picture, table and paragraph sits. Drawing them onto a blank
//! canvas at those positions gives enrichment something to crop (pictures
//! are pasted in at their real size), and the blocks come straight from the
//! XML instead of from detectors. Structural pages never go through the
//! table or handwriting detectors.
//!
//! Slides are scaled at 96 px per inch (9525 EMU per pixel); shapes inside
//! `p:grpSp` groups are mapped from the group's child frame onto the slide
//! first. Documents are
//! laid out on an 800 × 1000 canvas, one 20 px line per paragraph with a
//! 30 px pitch, breaking to a new page past y = 950.

use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::Path;

use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::block::{Block, BlockAction, BlockType};
use crate::error::IngestError;
use crate::layout::geometry::BBox;
use crate::layout::pdf::NativePage;
use crate::layout::RenderedPage;

const EMU_PER_PIXEL: i64 = 9525;
const DEFAULT_SLIDE_CX: i64 = 9_144_000;
const DEFAULT_SLIDE_CY: i64 = 6_858_000;

const DOC_PAGE_W: u32 = 800;
const DOC_PAGE_H: u32 = 1000;
const DOC_LEFT: f32 = 50.0;
const DOC_RIGHT: f32 = 750.0;
const DOC_TOP: f32 = 50.0;
const DOC_BOTTOM: f32 = 950.0;
const DOC_LINE_H: f32 = 20.0;
const DOC_LINE_PITCH: f32 = 30.0;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const INK: Rgb<u8> = Rgb([190, 190, 190]);
const RULE: Rgb<u8> = Rgb([128, 128, 128]);

/// Which package layout to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfficeKind {
    Slides,
    WordProcessor,
}

/// Parse the package and draw one raster per slide / page into `work_dir`.
pub async fn reconstruct(path: &Path, kind: OfficeKind, work_dir: &Path) -> Result<Vec<NativePage>, IngestError> {
    let path = path.to_path_buf();
    let out_dir = work_dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let failed = |detail: String| IngestError::StructuralParseFailed {
            path: path.clone(),
            detail,
        };
        let file = std::fs::File::open(&path).map_err(|e| failed(e.to_string()))?;
        let mut archive = ZipArchive::new(file).map_err(|e| failed(format!("not an OOXML package: {e}")))?;
        let pages = match kind {
            OfficeKind::Slides => reconstruct_slides(&mut archive, &out_dir),
            OfficeKind::WordProcessor => reconstruct_document(&mut archive, &out_dir),
        }
        .map_err(failed)?;
        info!(pages = pages.len(), "Structural reconstruction finished");
        Ok(pages)
    })
    .await
    .map_err(|e| IngestError::Internal(format!("Structural task panicked: {e}")))?
}

// ── Package helpers ──────────────────────────────────────────────────────

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<String, String> {
    let mut file = archive.by_name(name).map_err(|e| format!("missing {name}: {e}"))?;
    let mut content = String::new();
    file.read_to_string(&mut content).map_err(|e| format!("read {name}: {e}"))?;
    Ok(content)
}

fn read_bytes<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>, String> {
    let mut file = archive.by_name(name).map_err(|e| format!("missing {name}: {e}"))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).map_err(|e| format!("read {name}: {e}"))?;
    Ok(bytes)
}

fn attr(e: &BytesStart<'_>, reader: &Reader<&[u8]>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.decode_and_unescape_value(reader).ok())
        .map(|v| v.into_owned())
}

/// Resolve a relationship target against the directory of its source part.
fn resolve_part(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for seg in target.split('/') {
        match seg {
            ".." => {
                parts.pop();
            }
            "." | "" => {}
            other => parts.push(other),
        }
    }
    parts.join("/")
}

/// `Id → Target` for relationships whose type ends with `type_suffix`.
fn parse_rels(xml: &str, type_suffix: &str) -> Result<HashMap<String, String>, String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut rels = HashMap::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e) | Event::Start(e)) if e.name().as_ref() == b"Relationship" => {
                let rel_type = attr(&e, &reader, b"Type").unwrap_or_default();
                if rel_type.ends_with(type_suffix) {
                    if let (Some(id), Some(target)) = (attr(&e, &reader, b"Id"), attr(&e, &reader, b"Target")) {
                        rels.insert(id, target);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error in relationships: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

fn save_page(canvas: &RgbImage, number: usize, out_dir: &Path) -> Result<RenderedPage, String> {
    let raster = out_dir.join(format!("page_{number}.png"));
    canvas
        .save_with_format(&raster, ImageFormat::Png)
        .map_err(|e| format!("write {}: {e}", raster.display()))?;
    Ok(RenderedPage {
        page: number,
        raster,
        width: canvas.width(),
        height: canvas.height(),
    })
}

fn rect_of(b: &BBox) -> Option<Rect> {
    let w = b.width().round() as i64;
    let h = b.height().round() as i64;
    if w <= 0 || h <= 0 {
        return None;
    }
    Some(Rect::at(b.x0.round() as i32, b.y0.round() as i32).of_size(w as u32, h as u32))
}

/// Grey bars standing in for `lines` lines of text inside `b`.
fn draw_text_bars(canvas: &mut RgbImage, b: &BBox, lines: &[String]) {
    let line_h = (b.height() / lines.len().max(1) as f32).min(DOC_LINE_H);
    for (i, line) in lines.iter().enumerate() {
        let width = (line.chars().count() as f32 * 7.0).min(b.width()).max(1.0);
        let y = b.y0 + i as f32 * line_h + line_h * 0.2;
        let bar = BBox::new(b.x0, y, b.x0 + width, y + line_h * 0.6);
        if let Some(r) = rect_of(&bar) {
            draw_filled_rect_mut(canvas, r, INK);
        }
    }
}

fn draw_table(canvas: &mut RgbImage, b: &BBox, rows: usize) {
    if let Some(r) = rect_of(b) {
        draw_hollow_rect_mut(canvas, r, RULE);
    }
    let pitch = b.height() / rows.max(1) as f32;
    for i in 1..rows {
        let y = b.y0 + i as f32 * pitch;
        draw_line_segment_mut(canvas, (b.x0, y), (b.x1, y), RULE);
    }
}

fn table_content(rows: &[Vec<String>]) -> String {
    rows.iter()
        .map(|r| r.join(" | "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

// ── Slides ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShapeKind {
    Text,
    Picture,
    Table,
}

#[derive(Debug)]
struct Shape {
    kind: ShapeKind,
    offset: Option<(i64, i64)>,
    extent: Option<(i64, i64)>,
    paragraphs: Vec<String>,
    rows: Vec<Vec<String>>,
    embed: Option<String>,
}

impl Shape {
    fn new(kind: ShapeKind) -> Self {
        Self {
            kind,
            offset: None,
            extent: None,
            paragraphs: Vec::new(),
            rows: Vec::new(),
            embed: None,
        }
    }

    /// Pixel box, if the shape has a usable position and size.
    fn bbox(&self, canvas_w: u32, canvas_h: u32) -> Option<BBox> {
        let (x, y) = self.offset?;
        let (cx, cy) = self.extent?;
        if cx <= 0 || cy <= 0 {
            return None;
        }
        let b = BBox::new(
            (x / EMU_PER_PIXEL) as f32,
            (y / EMU_PER_PIXEL) as f32,
            ((x + cx) / EMU_PER_PIXEL) as f32,
            ((y + cy) / EMU_PER_PIXEL) as f32,
        )
        .clamp_to(canvas_w as f32, canvas_h as f32);
        (!b.is_degenerate()).then_some(b)
    }
}

/// Placement of a `p:grpSp`. Children are positioned in the child frame
/// (`a:chOff` / `a:chExt`), which maps onto the group's `a:off` / `a:ext`.
#[derive(Debug, Default, Clone, Copy)]
struct GroupFrame {
    off: Option<(i64, i64)>,
    ext: Option<(i64, i64)>,
    child_off: Option<(i64, i64)>,
    child_ext: Option<(i64, i64)>,
}

impl GroupFrame {
    fn record(&mut self, name: &[u8], e: &BytesStart<'_>, reader: &Reader<&[u8]>) {
        let slot = match name {
            b"a:off" => &mut self.off,
            b"a:ext" => &mut self.ext,
            b"a:chOff" => &mut self.child_off,
            b"a:chExt" => &mut self.child_ext,
            _ => return,
        };
        if slot.is_none() {
            *slot = match name {
                b"a:ext" | b"a:chExt" => attr_pair(e, reader, b"cx", b"cy"),
                _ => attr_pair(e, reader, b"x", b"y"),
            };
        }
    }

    /// Move `shape` from this group's child frame into its parent's frame.
    fn place(&self, shape: &mut Shape) {
        let (Some(off), Some(ext)) = (self.off, self.ext) else { return };
        let child_off = self.child_off.unwrap_or(off);
        let child_ext = self.child_ext.unwrap_or(ext);
        let scale = |to: i64, from: i64| if from > 0 { to as f64 / from as f64 } else { 1.0 };
        let (sx, sy) = (scale(ext.0, child_ext.0), scale(ext.1, child_ext.1));
        if let Some((x, y)) = shape.offset {
            shape.offset = Some((
                off.0 + ((x - child_off.0) as f64 * sx).round() as i64,
                off.1 + ((y - child_off.1) as f64 * sy).round() as i64,
            ));
        }
        if let Some((cx, cy)) = shape.extent {
            shape.extent = Some(((cx as f64 * sx).round() as i64, (cy as f64 * sy).round() as i64));
        }
    }
}

/// Slide size in EMU and slide part names in presentation order.
fn parse_presentation<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<((i64, i64), Vec<String>), String> {
    let xml = read_part(archive, "ppt/presentation.xml")?;
    let rels = parse_rels(&read_part(archive, "ppt/_rels/presentation.xml.rels")?, "/slide")?;

    let mut size = (DEFAULT_SLIDE_CX, DEFAULT_SLIDE_CY);
    let mut order = Vec::new();
    let mut reader = Reader::from_str(&xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e) | Event::Start(e)) => match e.name().as_ref() {
                b"p:sldSz" => {
                    let cx = attr(&e, &reader, b"cx").and_then(|v| v.parse().ok());
                    let cy = attr(&e, &reader, b"cy").and_then(|v| v.parse().ok());
                    if let (Some(cx), Some(cy)) = (cx, cy) {
                        size = (cx, cy);
                    }
                }
                b"p:sldId" => {
                    if let Some(target) = attr(&e, &reader, b"r:id").and_then(|id| rels.get(&id)) {
                        order.push(resolve_part("ppt", target));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error in presentation.xml: {e}")),
            _ => {}
        }
        buf.clear();
    }

    if order.is_empty() {
        let mut targets: Vec<String> = rels.values().map(|t| resolve_part("ppt", t)).collect();
        targets.sort_by_key(|t| slide_number(t));
        order = targets;
    }
    Ok((size, order))
}

fn slide_number(part: &str) -> usize {
    part.rsplit('/')
        .next()
        .map(|name| name.chars().filter(char::is_ascii_digit).collect::<String>())
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(usize::MAX)
}

/// Every shape on a slide with its geometry in slide coordinates and its
/// text. Grouped shapes are flattened.
fn parse_slide(xml: &str) -> Result<Vec<Shape>, String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut shapes = Vec::new();
    let mut current: Option<Shape> = None;
    let mut groups: Vec<GroupFrame> = Vec::new();
    let mut in_group_props = false;
    let mut in_text = false;
    let mut para = String::new();
    let mut row: Option<Vec<String>> = None;
    let mut cell: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"p:sp" => current = Some(Shape::new(ShapeKind::Text)),
                b"p:pic" => current = Some(Shape::new(ShapeKind::Picture)),
                b"p:graphicFrame" => current = Some(Shape::new(ShapeKind::Table)),
                b"p:grpSp" if current.is_none() => groups.push(GroupFrame::default()),
                b"p:grpSpPr" => in_group_props = true,
                b"a:p" => para.clear(),
                b"a:t" => in_text = true,
                b"a:tr" => row = Some(Vec::new()),
                b"a:tc" => cell = Some(String::new()),
                name => record_geometry(name, &e, &reader, current.as_mut(), groups.last_mut(), in_group_props),
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"a:br" => para.push('\n'),
                name => record_geometry(name, &e, &reader, current.as_mut(), groups.last_mut(), in_group_props),
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| format!("bad text run: {e}"))?;
                para.push_str(&text);
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"a:t" => in_text = false,
                b"a:p" => {
                    let text = para.trim().to_string();
                    if let Some(c) = cell.as_mut() {
                        if !c.is_empty() && !text.is_empty() {
                            c.push('\n');
                        }
                        c.push_str(&text);
                    } else if let Some(shape) = current.as_mut() {
                        if !text.is_empty() {
                            shape.paragraphs.push(text);
                        }
                    }
                    para.clear();
                }
                b"a:tc" => {
                    if let (Some(r), Some(c)) = (row.as_mut(), cell.take()) {
                        r.push(c.trim().to_string());
                    }
                }
                b"a:tr" => {
                    if let (Some(shape), Some(r)) = (current.as_mut(), row.take()) {
                        shape.rows.push(r);
                    }
                }
                b"p:grpSpPr" => in_group_props = false,
                b"p:grpSp" if current.is_none() => {
                    groups.pop();
                }
                b"p:sp" | b"p:pic" | b"p:graphicFrame" => {
                    if let Some(mut shape) = current.take() {
                        for group in groups.iter().rev() {
                            group.place(&mut shape);
                        }
                        shapes.push(shape);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error in slide: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(shapes)
}

/// Route a geometry element to the open shape, or to the innermost group
/// while its `p:grpSpPr` is open.
fn record_geometry(
    name: &[u8],
    e: &BytesStart<'_>,
    reader: &Reader<&[u8]>,
    shape: Option<&mut Shape>,
    group: Option<&mut GroupFrame>,
    in_group_props: bool,
) {
    match (shape, group) {
        (Some(shape), _) => apply_geometry(name, e, reader, shape),
        (None, Some(group)) if in_group_props => group.record(name, e, reader),
        _ => {}
    }
}

/// Record `a:off` / `a:ext` / `a:blip` on the open shape. The first
/// offset and extent win; later ones belong to nested children.
fn apply_geometry(name: &[u8], e: &BytesStart<'_>, reader: &Reader<&[u8]>, shape: &mut Shape) {
    match name {
        b"a:off" if shape.offset.is_none() => shape.offset = attr_pair(e, reader, b"x", b"y"),
        b"a:ext" if shape.extent.is_none() => shape.extent = attr_pair(e, reader, b"cx", b"cy"),
        b"a:blip" => shape.embed = attr(e, reader, b"r:embed"),
        _ => {}
    }
}

fn attr_pair(e: &BytesStart<'_>, reader: &Reader<&[u8]>, a: &[u8], b: &[u8]) -> Option<(i64, i64)> {
    let x = attr(e, reader, a)?.parse().ok()?;
    let y = attr(e, reader, b)?.parse().ok()?;
    Some((x, y))
}

fn reconstruct_slides<R: Read + Seek>(archive: &mut ZipArchive<R>, out_dir: &Path) -> Result<Vec<NativePage>, String> {
    let ((cx, cy), slides) = parse_presentation(archive)?;
    let canvas_w = (cx / EMU_PER_PIXEL).max(1) as u32;
    let canvas_h = (cy / EMU_PER_PIXEL).max(1) as u32;
    let mut pages = Vec::with_capacity(slides.len());

    for (idx, part) in slides.iter().enumerate() {
        let number = idx + 1;
        let shapes = parse_slide(&read_part(archive, part)?)?;
        let (dir, file) = part.rsplit_once('/').unwrap_or(("", part.as_str()));
        let rels_part = format!("{dir}/_rels/{file}.rels");
        let images = match read_part(archive, &rels_part) {
            Ok(xml) => parse_rels(&xml, "/image")?,
            Err(_) => HashMap::new(),
        };

        let mut canvas = RgbImage::from_pixel(canvas_w, canvas_h, WHITE);
        let mut blocks = Vec::new();
        for shape in &shapes {
            let Some(bbox) = shape.bbox(canvas_w, canvas_h) else { continue };
            match shape.kind {
                ShapeKind::Picture => {
                    let Some(target) = shape.embed.as_ref().and_then(|id| images.get(id)) else {
                        continue;
                    };
                    match paste_picture(archive, &resolve_part(dir, target), &bbox, &mut canvas) {
                        Ok(()) => blocks.push(Block::image(bbox)),
                        Err(e) => debug!(slide = number, error = %e, "Picture skipped"),
                    }
                }
                ShapeKind::Table if !shape.rows.is_empty() => {
                    draw_table(&mut canvas, &bbox, shape.rows.len());
                    blocks.push(Block::new(
                        BlockType::Table,
                        bbox,
                        BlockAction::ExtractTableLogic,
                        table_content(&shape.rows),
                    ));
                }
                ShapeKind::Text if !shape.paragraphs.is_empty() => {
                    draw_text_bars(&mut canvas, &bbox, &shape.paragraphs);
                    blocks.push(Block::text(bbox, shape.paragraphs.join("\n")));
                }
                _ => {}
            }
        }

        debug!(slide = number, shapes = shapes.len(), blocks = blocks.len(), "Slide reconstructed");
        pages.push((save_page(&canvas, number, out_dir)?, blocks));
    }
    Ok(pages)
}

fn paste_picture<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    part: &str,
    bbox: &BBox,
    canvas: &mut RgbImage,
) -> Result<(), String> {
    let bytes = read_bytes(archive, part)?;
    let picture = image::load_from_memory(&bytes).map_err(|e| format!("decode {part}: {e}"))?;
    let w = bbox.width().round().max(1.0) as u32;
    let h = bbox.height().round().max(1.0) as u32;
    let resized = picture.resize_exact(w, h, FilterType::Triangle).to_rgb8();
    imageops::overlay(canvas, &resized, bbox.x0.round() as i64, bbox.y0.round() as i64);
    Ok(())
}

// ── Documents ────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
enum DocItem {
    Paragraph { text: String, heading: bool },
    Table(Vec<Vec<String>>),
}

/// Body paragraphs and tables in document order.
fn parse_document(xml: &str) -> Result<Vec<DocItem>, String> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut items = Vec::new();
    let mut table_depth = 0usize;
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Option<Vec<String>> = None;
    let mut cell: Option<String> = None;
    let mut para = String::new();
    let mut heading = false;
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:tbl" => {
                    table_depth += 1;
                    if table_depth == 1 {
                        rows.clear();
                    }
                }
                b"w:tr" if table_depth == 1 => row = Some(Vec::new()),
                b"w:tc" if table_depth == 1 => cell = Some(String::new()),
                b"w:p" => {
                    para.clear();
                    heading = false;
                }
                b"w:t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:pStyle" => {
                    let style = attr(&e, &reader, b"w:val").unwrap_or_default();
                    heading = style == "Title" || style.starts_with("Heading");
                }
                b"w:tab" => para.push('\t'),
                b"w:br" => para.push('\n'),
                _ => {}
            },
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| format!("bad text run: {e}"))?;
                para.push_str(&text);
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:p" => {
                    let text = para.trim().to_string();
                    if table_depth > 0 {
                        if let Some(c) = cell.as_mut() {
                            if !c.is_empty() && !text.is_empty() {
                                c.push(' ');
                            }
                            c.push_str(&text);
                        }
                    } else if !text.is_empty() {
                        items.push(DocItem::Paragraph { text, heading });
                    }
                    para.clear();
                }
                b"w:tc" if table_depth == 1 => {
                    if let (Some(r), Some(c)) = (row.as_mut(), cell.take()) {
                        r.push(c.trim().to_string());
                    }
                }
                b"w:tr" if table_depth == 1 => {
                    if let Some(r) = row.take() {
                        rows.push(r);
                    }
                }
                b"w:tbl" => {
                    table_depth = table_depth.saturating_sub(1);
                    if table_depth == 0 && !rows.is_empty() {
                        items.push(DocItem::Table(std::mem::take(&mut rows)));
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML parse error in document.xml: {e}")),
            _ => {}
        }
        buf.clear();
    }
    Ok(items)
}

/// Lay items out top-to-bottom, one line per paragraph and one line per
/// table row, starting a new page when the next item would pass the
/// bottom margin.
fn layout_document(items: &[DocItem]) -> Vec<Vec<(BBox, &DocItem)>> {
    let mut pages: Vec<Vec<(BBox, &DocItem)>> = vec![Vec::new()];
    let mut y = DOC_TOP;
    for item in items {
        let lines = match item {
            DocItem::Paragraph { .. } => 1,
            DocItem::Table(rows) => rows.len().max(1),
        };
        let height = DOC_LINE_PITCH * (lines as f32 - 1.0) + DOC_LINE_H;
        let on_fresh_page = pages.last().map_or(true, Vec::is_empty);
        if y + height > DOC_BOTTOM && !on_fresh_page {
            pages.push(Vec::new());
            y = DOC_TOP;
        }
        let bbox = BBox::new(DOC_LEFT, y, DOC_RIGHT, y + height);
        if let Some(page) = pages.last_mut() {
            page.push((bbox, item));
        }
        y += DOC_LINE_PITCH * lines as f32;
    }
    pages.retain(|p| !p.is_empty());
    pages
}

fn reconstruct_document<R: Read + Seek>(archive: &mut ZipArchive<R>, out_dir: &Path) -> Result<Vec<NativePage>, String> {
    let items = parse_document(&read_part(archive, "word/document.xml")?)?;
    let mut pages = Vec::new();

    for (idx, placed) in layout_document(&items).into_iter().enumerate() {
        let number = idx + 1;
        let mut canvas = RgbImage::from_pixel(DOC_PAGE_W, DOC_PAGE_H, WHITE);
        let mut blocks = Vec::with_capacity(placed.len());
        for (bbox, item) in placed {
            match item {
                DocItem::Paragraph { text, heading } => {
                    draw_text_bars(&mut canvas, &bbox, std::slice::from_ref(text));
                    blocks.push(if *heading {
                        Block::title(bbox, text.clone())
                    } else {
                        Block::text(bbox, text.clone())
                    });
                }
                DocItem::Table(rows) => {
                    draw_table(&mut canvas, &bbox, rows.len());
                    blocks.push(Block::new(
                        BlockType::Table,
                        bbox,
                        BlockAction::ExtractTableLogic,
                        table_content(rows),
                    ));
                }
            }
        }
        pages.push((save_page(&canvas, number, out_dir)?, blocks));
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn package(parts: &[(&str, &[u8])]) -> ZipArchive<Cursor<Vec<u8>>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, bytes) in parts {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(bytes).unwrap();
        }
        let cursor = writer.finish().unwrap();
        ZipArchive::new(Cursor::new(cursor.into_inner())).unwrap()
    }

    const PRESENTATION: &str = r#"<p:presentation xmlns:p="p" xmlns:r="r">
        <p:sldIdLst><p:sldId id="257" r:id="rId3"/><p:sldId id="256" r:id="rId2"/></p:sldIdLst>
        <p:sldSz cx="12192000" cy="6858000"/></p:presentation>"#;

    const PRESENTATION_RELS: &str = r#"<Relationships>
        <Relationship Id="rId2" Type="http://schemas/officeDocument/2006/relationships/slide" Target="slides/slide1.xml"/>
        <Relationship Id="rId3" Type="http://schemas/officeDocument/2006/relationships/slide" Target="slides/slide2.xml"/>
        <Relationship Id="rId9" Type="http://schemas/officeDocument/2006/relationships/slideMaster" Target="slideMasters/slideMaster1.xml"/>
        </Relationships>"#;

    const SLIDE: &str = r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree>
        <p:sp><p:spPr><a:xfrm><a:off x="952500" y="952500"/><a:ext cx="4762500" cy="952500"/></a:xfrm></p:spPr>
          <p:txBody><a:p><a:r><a:t>Quarterly </a:t></a:r><a:r><a:t>results</a:t></a:r></a:p><a:p><a:r><a:t>Revenue up</a:t></a:r></a:p></p:txBody></p:sp>
        <p:graphicFrame><p:xfrm><a:off x="952500" y="2857500"/><a:ext cx="4762500" cy="1905000"/></p:xfrm>
          <a:graphic><a:graphicData><a:tbl>
            <a:tr><a:tc><a:txBody><a:p><a:r><a:t>Q1</a:t></a:r></a:p></a:txBody></a:tc><a:tc><a:txBody><a:p><a:r><a:t>10</a:t></a:r></a:p></a:txBody></a:tc></a:tr>
            <a:tr><a:tc><a:txBody><a:p><a:r><a:t>Q2</a:t></a:r></a:p></a:txBody></a:tc><a:tc><a:txBody><a:p><a:r><a:t>12</a:t></a:r></a:p></a:txBody></a:tc></a:tr>
          </a:tbl></a:graphicData></a:graphic></p:graphicFrame>
        </p:spTree></p:cSld></p:sld>"#;

    #[test]
    fn relationship_targets_resolve_against_part_directory() {
        assert_eq!(resolve_part("ppt/slides", "../media/image1.png"), "ppt/media/image1.png");
        assert_eq!(resolve_part("ppt", "slides/slide1.xml"), "ppt/slides/slide1.xml");
        assert_eq!(resolve_part("ppt/slides", "/ppt/media/x.png"), "ppt/media/x.png");
    }

    #[test]
    fn slide_shapes_carry_geometry_text_and_rows() {
        let shapes = parse_slide(SLIDE).unwrap();
        assert_eq!(shapes.len(), 2);
        assert_eq!(shapes[0].kind, ShapeKind::Text);
        assert_eq!(shapes[0].paragraphs, vec!["Quarterly results", "Revenue up"]);
        assert_eq!(shapes[0].bbox(1280, 720), Some(BBox::new(100.0, 100.0, 600.0, 200.0)));
        assert_eq!(shapes[1].kind, ShapeKind::Table);
        assert_eq!(shapes[1].rows, vec![vec!["Q1", "10"], vec!["Q2", "12"]]);
        assert_eq!(table_content(&shapes[1].rows), "Q1 | 10\nQ2 | 12");
    }

    #[test]
    fn grouped_shapes_are_mapped_through_the_group_frame() {
        let xml = r#"<p:sld xmlns:p="p" xmlns:a="a"><p:cSld><p:spTree>
            <p:grpSpPr><a:xfrm><a:off x="0" y="0"/><a:ext cx="0" cy="0"/><a:chOff x="0" y="0"/><a:chExt cx="0" cy="0"/></a:xfrm></p:grpSpPr>
            <p:grpSp>
              <p:grpSpPr><a:xfrm><a:off x="952500" y="952500"/><a:ext cx="1905000" cy="952500"/><a:chOff x="0" y="0"/><a:chExt cx="3810000" cy="1905000"/></a:xfrm></p:grpSpPr>
              <p:sp><p:spPr><a:xfrm><a:off x="1905000" y="0"/><a:ext cx="1905000" cy="1905000"/></a:xfrm></p:spPr>
                <p:txBody><a:p><a:r><a:t>Grouped</a:t></a:r></a:p></p:txBody></p:sp>
            </p:grpSp>
            <p:sp><p:spPr><a:xfrm><a:off x="0" y="4762500"/><a:ext cx="952500" cy="952500"/></a:xfrm></p:spPr>
              <p:txBody><a:p><a:r><a:t>Loose</a:t></a:r></a:p></p:txBody></p:sp>
            </p:spTree></p:cSld></p:sld>"#;
        let shapes = parse_slide(xml).unwrap();
        assert_eq!(shapes.len(), 2);
        assert_eq!(shapes[0].paragraphs, vec!["Grouped"]);
        // Child frame is twice the group's size: half scale, shifted by the group offset.
        assert_eq!(shapes[0].bbox(1280, 720), Some(BBox::new(200.0, 100.0, 300.0, 200.0)));
        assert_eq!(shapes[1].paragraphs, vec!["Loose"]);
        assert_eq!(shapes[1].bbox(1280, 720), Some(BBox::new(0.0, 500.0, 100.0, 600.0)));
    }

    #[test]
    fn slides_follow_presentation_order_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = package(&[
            ("ppt/presentation.xml", PRESENTATION.as_bytes()),
            ("ppt/_rels/presentation.xml.rels", PRESENTATION_RELS.as_bytes()),
            ("ppt/slides/slide1.xml", SLIDE.as_bytes()),
            ("ppt/slides/slide2.xml", b"<p:sld xmlns:p=\"p\"/>"),
        ]);
        let pages = reconstruct_slides(&mut archive, dir.path()).unwrap();
        assert_eq!(pages.len(), 2);
        // rId3 (slide2, empty) comes first.
        assert!(pages[0].1.is_empty());
        let (rendered, blocks) = &pages[1];
        assert_eq!((rendered.width, rendered.height), (1280, 720));
        assert!(rendered.raster.exists());
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].block_type, BlockType::Table);
    }

    #[test]
    fn document_paragraphs_and_tables_in_order() {
        let xml = r#"<w:document xmlns:w="w"><w:body>
            <w:p><w:pPr><w:pStyle w:val="Heading1"/></w:pPr><w:r><w:t>Summary</w:t></w:r></w:p>
            <w:p><w:r><w:t xml:space="preserve">Sales </w:t></w:r><w:r><w:t>grew.</w:t></w:r></w:p>
            <w:p/>
            <w:tbl><w:tr><w:tc><w:p><w:r><w:t>A</w:t></w:r></w:p></w:tc><w:tc><w:p><w:r><w:t>B</w:t></w:r></w:p></w:tc></w:tr></w:tbl>
            </w:body></w:document>"#;
        let items = parse_document(xml).unwrap();
        assert_eq!(
            items,
            vec![
                DocItem::Paragraph {
                    text: "Summary".into(),
                    heading: true
                },
                DocItem::Paragraph {
                    text: "Sales grew.".into(),
                    heading: false
                },
                DocItem::Table(vec![vec!["A".into(), "B".into()]]),
            ]
        );
    }

    #[test]
    fn document_layout_uses_fixed_pitch_and_paginates() {
        let items: Vec<DocItem> = (0..40)
            .map(|i| DocItem::Paragraph {
                text: format!("line {i}"),
                heading: false,
            })
            .collect();
        let pages = layout_document(&items);
        assert_eq!(pages[0][0].0, BBox::new(50.0, 50.0, 750.0, 70.0));
        assert_eq!(pages[0][1].0, BBox::new(50.0, 80.0, 750.0, 100.0));
        assert!(pages.len() > 1);
        assert!(pages[0].iter().all(|(b, _)| b.y1 <= DOC_BOTTOM));
        assert_eq!(pages[1][0].0.y0, DOC_TOP);
        assert_eq!(pages.iter().map(Vec::len).sum::<usize>(), 40);
    }
}
