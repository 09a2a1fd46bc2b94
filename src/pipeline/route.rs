//! Source classification: decide once which processing path a source takes.
//!
//! ```text
//! youtube.com / youtu.be URL      → stream   (transcript fetch)
//! other http(s) URL               → unsupported
//! .mp3 .wav .m4a .flac .ogg …     → media    (transcription)
//! .mp4 .mkv .mov .avi .wmv .webm  → media    (demux, then transcription)
//! .pdf / images / pptx / docx     → document (layout + enrichment)
//! ```
//!
//! [`classify`] is pure: it looks at the string only. Whether a local file
//! exists and is readable is checked separately by [`resolve_local`].

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use tracing::debug;

use crate::error::IngestError;
use crate::layout::DocumentFormat;

const AUDIO_EXTENSIONS: [&str; 7] = ["mp3", "wav", "m4a", "flac", "ogg", "aac", "wma"];
const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "mkv", "mov", "avi", "wmv", "webm"];
const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff", "webp"];

static STREAM_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

/// The processing path chosen for a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Document(DocumentFormat),
    /// Audio, or video whose audio track must be demuxed first.
    Media { video: bool },
    Stream { stream_id: String },
}

impl SourceKind {
    /// `document`, `media` or `stream`.
    pub fn label(&self) -> &'static str {
        match self {
            SourceKind::Document(_) => "document",
            SourceKind::Media { .. } => "media",
            SourceKind::Stream { .. } => "stream",
        }
    }
}

/// Does the string look like a URL rather than a path?
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Classify a path or URL.
pub fn classify(source: &str) -> Result<SourceKind, IngestError> {
    if is_url(source) {
        return classify_url(source);
    }

    let extension = Path::new(source)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let kind = match extension.as_str() {
        e if AUDIO_EXTENSIONS.contains(&e) => SourceKind::Media { video: false },
        e if VIDEO_EXTENSIONS.contains(&e) => SourceKind::Media { video: true },
        e if IMAGE_EXTENSIONS.contains(&e) => SourceKind::Document(DocumentFormat::Image),
        "pdf" => SourceKind::Document(DocumentFormat::Pdf),
        "pptx" | "ppt" => SourceKind::Document(DocumentFormat::Slides),
        "docx" | "doc" => SourceKind::Document(DocumentFormat::WordProcessor),
        _ => {
            return Err(IngestError::UnsupportedSource {
                path: PathBuf::from(source),
                extension: if extension.is_empty() { "(none)".into() } else { extension },
            })
        }
    };
    debug!(source, kind = kind.label(), "Source classified");
    Ok(kind)
}

fn classify_url(url: &str) -> Result<SourceKind, IngestError> {
    let unsupported = || IngestError::UnsupportedSource {
        path: PathBuf::from(url),
        extension: "url".into(),
    };
    let parsed = Url::parse(url).map_err(|_| unsupported())?;
    let host = parsed.host_str().unwrap_or_default().to_lowercase();
    let host = host.strip_prefix("www.").or_else(|| host.strip_prefix("m.")).unwrap_or(&host);

    let candidate = match host {
        "youtu.be" => parsed.path_segments().and_then(|mut s| s.next()).map(str::to_string),
        "youtube.com" => {
            let mut segments = parsed.path_segments().map(|s| s.collect::<Vec<_>>()).unwrap_or_default();
            segments.retain(|s| !s.is_empty());
            match segments.as_slice() {
                ["watch"] => parsed
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                ["embed" | "v" | "shorts" | "live", id, ..] => Some((*id).to_string()),
                _ => None,
            }
        }
        _ => return Err(unsupported()),
    };

    match candidate {
        Some(id) if STREAM_ID.is_match(&id) => Ok(SourceKind::Stream { stream_id: id }),
        _ => Err(IngestError::InvalidStreamUrl { url: url.to_string() }),
    }
}

/// Check that a local source exists and can be opened.
pub fn resolve_local(source: &str) -> Result<PathBuf, IngestError> {
    let path = PathBuf::from(source);
    if !path.is_file() {
        return Err(IngestError::SourceNotFound { path });
    }
    match std::fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(IngestError::PermissionDenied { path }),
        Err(_) => Err(IngestError::SourceNotFound { path }),
    }
}

/// Directory name for a run's outputs: the file stem, or `stream_{id}`.
pub fn output_name(source: &str, kind: &SourceKind) -> String {
    match kind {
        SourceKind::Stream { stream_id } => format!("stream_{stream_id}"),
        _ => Path::new(source)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "source".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(id: &str) -> SourceKind {
        SourceKind::Stream { stream_id: id.into() }
    }

    #[test]
    fn extensions_pick_the_path() {
        assert_eq!(classify("talk.MP3").unwrap(), SourceKind::Media { video: false });
        assert_eq!(classify("/data/clip.mkv").unwrap(), SourceKind::Media { video: true });
        assert_eq!(classify("scan.TIFF").unwrap(), SourceKind::Document(DocumentFormat::Image));
        assert_eq!(classify("report.pdf").unwrap(), SourceKind::Document(DocumentFormat::Pdf));
        assert_eq!(classify("deck.pptx").unwrap(), SourceKind::Document(DocumentFormat::Slides));
        assert_eq!(
            classify("memo.doc").unwrap(),
            SourceKind::Document(DocumentFormat::WordProcessor)
        );
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        assert!(matches!(
            classify("notes.txt"),
            Err(IngestError::UnsupportedSource { extension, .. }) if extension == "txt"
        ));
        assert!(matches!(
            classify("Makefile"),
            Err(IngestError::UnsupportedSource { extension, .. }) if extension == "(none)"
        ));
    }

    #[test]
    fn stream_urls_yield_ids() {
        assert_eq!(classify("https://www.youtube.com/watch?v=dQw4w9WgXcQ").unwrap(), stream("dQw4w9WgXcQ"));
        assert_eq!(
            classify("https://youtube.com/watch?feature=share&v=abc_DEF-123").unwrap(),
            stream("abc_DEF-123")
        );
        assert_eq!(classify("https://youtu.be/dQw4w9WgXcQ?t=42").unwrap(), stream("dQw4w9WgXcQ"));
        assert_eq!(classify("https://www.youtube.com/embed/xyz789").unwrap(), stream("xyz789"));
        assert_eq!(classify("https://m.youtube.com/v/xyz789").unwrap(), stream("xyz789"));
    }

    #[test]
    fn stream_urls_without_ids_are_invalid() {
        assert!(matches!(
            classify("https://www.youtube.com/feed/trending"),
            Err(IngestError::InvalidStreamUrl { .. })
        ));
        assert!(matches!(classify("https://youtu.be/"), Err(IngestError::InvalidStreamUrl { .. })));
    }

    #[test]
    fn other_urls_are_unsupported() {
        assert!(matches!(
            classify("https://example.com/report.pdf"),
            Err(IngestError::UnsupportedSource { .. })
        ));
    }

    #[test]
    fn missing_local_file_is_not_found() {
        assert!(matches!(
            resolve_local("/definitely/not/here.pdf"),
            Err(IngestError::SourceNotFound { .. })
        ));
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(resolve_local(file.path().to_str().unwrap()).is_ok());
    }

    #[test]
    fn output_names() {
        assert_eq!(output_name("/x/Annual Report.v2.pdf", &SourceKind::Document(DocumentFormat::Pdf)), "Annual Report.v2");
        assert_eq!(output_name("https://youtu.be/abc", &stream("abc")), "stream_abc");
    }
}
