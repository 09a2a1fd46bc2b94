//! # edgequake-ingest
//!
//! Turn documents, recordings and transcript streams into ordered, typed
//! content blocks ready for chunking and indexing.
//!
//! ## Why this crate?
//!
//! A page is read by several independent detectors: the native text layer
//! (or a recogniser for scans), a table detector and a handwriting detector.
//! Each sees the page alone and their boxes overlap. This crate reconciles
//! them into one top-to-bottom block list per page, then fills the blocks
//! that still hold placeholders (tables, pictures, handwriting) by asking
//! long-lived model worker processes, with a fallback chain for each.
//!
//! ## Pipeline Overview
//!
//! ```text
//! source
//!  │
//!  ├─ 1. Route   stream URL / audio+video / document (pure classification)
//!  ├─ 2. Layout  pdfium pages, image recognition or office packages
//!  │             + table / handwriting detections → merge engine
//!  ├─ 3. Enrich  placeholder blocks → worker chains (table, caption, OCR)
//!  │     or
//!  ├─ 2'. Media  ffmpeg demux → transcription worker
//!  ├─ 2''. Stream published transcript fetch
//!  └─ 4. Output  rag_ready_data.json + stable-id chunks
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ingest::{ingest, Capability, IngestConfig, WorkerSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IngestConfig::builder()
//!         .worker(Capability::RecognizeText, WorkerSpec::new("python3").arg("workers/ocr.py"))
//!         .worker(Capability::DetectTables, WorkerSpec::new("python3").arg("workers/tables.py"))
//!         .build()?;
//!     let result = ingest("report.pdf", &config).await?;
//!     println!("{}: {} blocks", result.status, result.stats.blocks);
//!     for chunk in result.chunks("report-2024", &Default::default()) {
//!         println!("{} {}", chunk.id, chunk.metadata.chunk_type);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Workers
//!
//! Every model capability is a child process speaking one JSON value per
//! line on stdin/stdout. See [`worker`] for the protocol and failure model.
//! A capability with no configured worker simply yields nothing: pages
//! still come out, with sentinel content where a worker would have filled
//! in text.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ingest` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-ingest = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod block;
pub mod cancel;
pub mod chunk;
pub mod config;
pub mod error;
pub mod external;
pub mod ingest;
pub mod layout;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use block::{Block, BlockAction, BlockType};
pub use cancel::CancelToken;
pub use chunk::{chunk_output, Chunk, ChunkMetadata, ChunkOptions};
pub use config::{IngestConfig, IngestConfigBuilder};
pub use error::{IngestError, Recoverable, WorkerError};
pub use ingest::{ingest, ingest_bytes, ingest_sync, ingest_to_dir};
pub use layout::geometry::BBox;
pub use layout::merge::{Detection, MergeThresholds};
pub use layout::{DocumentFormat, LayoutDetectors, RenderedPage};
pub use output::{
    write_output, Page, PipelineResult, PipelineStatus, RagReadyData, RunStats, Segment, Stage, TranscriptOrigin,
    TranscriptRecord,
};
pub use pipeline::transcript::{HttpTranscriptSource, TranscriptSource};
pub use pipeline::Pipeline;
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use worker::{Capability, WorkerPool, WorkerReply, WorkerSpec};
