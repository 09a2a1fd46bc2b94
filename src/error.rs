//! Error types for the edgequake-ingest library.
//!
//! Three error types reflect three distinct failure modes:
//!
//! * [`IngestError`] - **Fatal**: the run cannot proceed (unsupported or
//!   unreadable source, layout analysis failed, transcription failed). The
//!   pipeline records it as `status = failed` with the triggering stage.
//!
//! * [`WorkerError`] - **Recoverable**: a capability process was unavailable,
//!   timed out, or answered with something that is not JSON. Carried inside
//!   [`crate::worker::WorkerReply::Unavailable`] and treated by callers exactly
//!   like an empty result.
//!
//! * [`Recoverable`] - **Per block**: enrichment of one block failed. The block
//!   keeps its pre-enrichment content and the page carries on.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All fatal errors raised by a pipeline run.
#[derive(Debug, Error)]
pub enum IngestError {
    // ── Classification errors ─────────────────────────────────────────────
    /// Source file was not found at the given path.
    #[error("Source not found: '{path}'\nCheck the path exists and is readable.")]
    SourceNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The extension is not handled by any processing path.
    #[error("Unsupported source type '{extension}' for '{path}'")]
    UnsupportedSource { path: PathBuf, extension: String },

    /// Looked like a stream URL but no stream id could be extracted.
    #[error("Invalid stream URL '{url}': no stream id found")]
    InvalidStreamUrl { url: String },

    // ── Layout errors ─────────────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/dir/containing/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    /// PDF header/trailer/xref is corrupt or the document is encrypted.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// The image could not be decoded or re-encoded.
    #[error("Image '{path}' could not be processed: {detail}")]
    ImageDecodeFailed { path: PathBuf, detail: String },

    /// The external office-to-PDF converter failed or timed out.
    #[error("Office conversion of '{path}' failed: {detail}")]
    OfficeConversionFailed { path: PathBuf, detail: String },

    /// The OOXML package could not be read by the structural fallback.
    #[error("Structural parse of '{path}' failed: {detail}")]
    StructuralParseFailed { path: PathBuf, detail: String },

    // ── Media / stream errors ─────────────────────────────────────────────
    /// ffmpeg could not demux the audio track.
    #[error("Audio extraction from '{path}' failed: {detail}")]
    MediaExtractionFailed { path: PathBuf, detail: String },

    /// The transcription capability returned an error or nothing at all.
    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    /// No transcript could be fetched for the stream.
    #[error("Transcript unavailable for stream '{stream_id}': {reason}")]
    TranscriptUnavailable { stream_id: String, reason: String },

    // ── Run control ───────────────────────────────────────────────────────
    /// The caller cancelled the run at a stage boundary.
    #[error("Run cancelled during {stage}")]
    Cancelled { stage: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output artifact.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a worker could not produce a reply.
///
/// Never escapes the pool as an `Err`: it is wrapped in
/// [`crate::worker::WorkerReply::Unavailable`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WorkerError {
    /// No launcher was registered for the capability.
    #[error("no worker configured for capability '{0}'")]
    NotConfigured(String),

    /// The worker process could not be started.
    #[error("failed to start worker '{capability}': {detail}")]
    SpawnFailed { capability: String, detail: String },

    /// Writing the request line failed (stdin closed).
    #[error("worker '{capability}' is not writable: {detail}")]
    WriteFailed { capability: String, detail: String },

    /// No response line arrived before the deadline.
    #[error("worker '{capability}' did not answer within {timeout:?}")]
    Timeout {
        capability: String,
        timeout: Duration,
    },

    /// The worker closed its output stream (process exited).
    #[error("worker '{0}' closed its output stream")]
    ClosedStream(String),

    /// The response line was not valid JSON.
    #[error("worker '{capability}' sent malformed JSON: {detail}")]
    MalformedReply { capability: String, detail: String },

    /// The payload cannot be framed as a single request line.
    #[error("payload cannot be sent on the worker channel: {0}")]
    InvalidPayload(String),
}

/// A non-fatal failure while enriching one block.
#[derive(Debug, Error)]
pub enum Recoverable {
    /// The block region could not be cropped or written for the worker.
    #[error("crop of block {block_id} failed: {detail}")]
    Crop { block_id: String, detail: String },

    /// The capability was unavailable and no sentinel applies.
    #[error("block {block_id}: {source}")]
    Worker {
        block_id: String,
        #[source]
        source: WorkerError,
    },
}

impl IngestError {
    /// Short, stable label used in logs and progress events.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::SourceNotFound { .. }
            | IngestError::PermissionDenied { .. }
            | IngestError::UnsupportedSource { .. }
            | IngestError::InvalidStreamUrl { .. } => "classification",
            IngestError::Cancelled { .. } => "cancelled",
            IngestError::InvalidConfig(_) => "config",
            IngestError::OutputWriteFailed { .. } => "output",
            IngestError::Internal(_) => "internal",
            _ => "stage",
        }
    }
}
