//! Configuration types for an ingestion run.
//!
//! All pipeline behaviour is controlled through [`IngestConfig`], built via
//! its [`IngestConfigBuilder`]. Worker launch commands, external tool paths,
//! timeouts and merge thresholds all live here so that one value describes a
//! run completely and can be logged or diffed.
//!
//! # Design choice: builder over constructor
//! Most callers only need to register a few workers and an output directory.
//! The builder lets them set just that and rely on documented defaults for
//! everything else, while `build()` rejects combinations that cannot work.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::IngestError;
use crate::layout::merge::MergeThresholds;
use crate::progress::ProgressCallback;
use crate::worker::{Capability, WorkerPool, WorkerSpec};

/// Configuration for an ingestion run.
///
/// # Example
/// ```rust
/// use edgequake_ingest::{IngestConfig, Capability, WorkerSpec};
///
/// let config = IngestConfig::builder()
///     .dpi(150)
///     .worker(Capability::RecognizeText, WorkerSpec::new("python3").arg("workers/ocr_worker.py"))
///     .output_dir("data_output")
///     .build()
///     .unwrap();
/// assert!(config.workers.contains_key(&Capability::RecognizeText));
/// ```
#[derive(Clone)]
pub struct IngestConfig {
    /// Rendering DPI used when rasterising PDF pages. Range: 72–400. Default: 150.
    ///
    /// Detector workers are trained on roughly 150 DPI scans; going much
    /// higher mostly makes page images slower to load on the worker side.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    ///
    /// Caps large-format pages independently of DPI, scaling the other
    /// dimension proportionally.
    pub max_rendered_pixels: u32,

    /// Launch command for each capability. Capabilities without an entry are
    /// treated as permanently unavailable.
    pub workers: HashMap<Capability, WorkerSpec>,

    /// Deadline for one worker round trip. Default: 300 s.
    ///
    /// Long on purpose: the first request to a worker includes its model load.
    pub worker_timeout: Duration,

    /// How long a worker gets to exit after `EXIT` before it is killed. Default: 2 s.
    pub shutdown_grace: Duration,

    /// Merge engine cut-offs.
    pub merge: MergeThresholds,

    /// Text and title blocks shorter than this (trimmed) are dropped before
    /// enrichment. Default: 2.
    pub min_block_chars: usize,

    /// ffmpeg executable used to demux video. Default: `ffmpeg`.
    pub ffmpeg_program: String,

    /// Office-to-PDF converter (LibreOffice). `None` skips straight to the
    /// structural fallback. Default: `soffice`.
    pub office_program: Option<String>,

    /// Timeout for ffmpeg and the office converter. Default: 120 s.
    pub external_timeout: Duration,

    /// Transcript endpoint template containing `{id}`. Required for stream
    /// sources unless a custom transcript source is injected.
    pub transcript_endpoint: Option<String>,

    /// HTTP timeout for transcript fetches in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Directory holding the pdfium shared library. Falls back to
    /// `PDFIUM_LIB_PATH`, then the system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Root of per-source output folders. Default: `data_output`.
    pub output_dir: PathBuf,

    /// Write annotated page images next to the output. Default: false.
    pub visualize: bool,

    /// Optional progress callback for per-page / per-block events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            workers: HashMap::new(),
            worker_timeout: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(2),
            merge: MergeThresholds::default(),
            min_block_chars: 2,
            ffmpeg_program: "ffmpeg".into(),
            office_program: Some("soffice".into()),
            external_timeout: Duration::from_secs(120),
            transcript_endpoint: None,
            download_timeout_secs: 120,
            pdfium_lib_path: None,
            password: None,
            output_dir: PathBuf::from("data_output"),
            visualize: false,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut workers: Vec<_> = self
            .workers
            .iter()
            .map(|(cap, spec)| format!("{cap}={}", spec.program))
            .collect();
        workers.sort();
        f.debug_struct("IngestConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("workers", &workers)
            .field("worker_timeout", &self.worker_timeout)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("merge", &self.merge)
            .field("min_block_chars", &self.min_block_chars)
            .field("ffmpeg_program", &self.ffmpeg_program)
            .field("office_program", &self.office_program)
            .field("external_timeout", &self.external_timeout)
            .field("transcript_endpoint", &self.transcript_endpoint)
            .field("output_dir", &self.output_dir)
            .field("visualize", &self.visualize)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn PipelineProgressCallback>"),
            )
            .finish()
    }
}

impl IngestConfig {
    /// Create a new builder for `IngestConfig`.
    pub fn builder() -> IngestConfigBuilder {
        IngestConfigBuilder {
            config: Self::default(),
        }
    }

    /// A pool over this config's worker launchers.
    pub fn worker_pool(&self) -> WorkerPool {
        WorkerPool::new(self.workers.clone(), self.worker_timeout, self.shutdown_grace)
    }
}

/// Builder for [`IngestConfig`].
#[derive(Debug)]
pub struct IngestConfigBuilder {
    config: IngestConfig,
}

impl IngestConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    /// Register (or replace) the launcher for one capability.
    pub fn worker(mut self, capability: Capability, spec: WorkerSpec) -> Self {
        self.config.workers.insert(capability, spec);
        self
    }

    pub fn worker_timeout(mut self, timeout: Duration) -> Self {
        self.config.worker_timeout = timeout;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn merge_thresholds(mut self, thresholds: MergeThresholds) -> Self {
        self.config.merge = thresholds;
        self
    }

    pub fn min_block_chars(mut self, n: usize) -> Self {
        self.config.min_block_chars = n;
        self
    }

    pub fn ffmpeg_program(mut self, program: impl Into<String>) -> Self {
        self.config.ffmpeg_program = program.into();
        self
    }

    /// `None` disables office conversion entirely.
    pub fn office_program(mut self, program: Option<String>) -> Self {
        self.config.office_program = program;
        self
    }

    pub fn external_timeout(mut self, timeout: Duration) -> Self {
        self.config.external_timeout = timeout;
        self
    }

    pub fn transcript_endpoint(mut self, template: impl Into<String>) -> Self {
        self.config.transcript_endpoint = Some(template.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn pdfium_lib_path(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(dir.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn visualize(mut self, v: bool) -> Self {
        self.config.visualize = v;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IngestConfig, IngestError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(IngestError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.worker_timeout.is_zero() {
            return Err(IngestError::InvalidConfig("worker timeout must be > 0".into()));
        }
        if c.external_timeout.is_zero() {
            return Err(IngestError::InvalidConfig("external tool timeout must be > 0".into()));
        }
        let m = &c.merge;
        if !(0.0..=1.0).contains(&m.table_containment) || !(0.0..=1.0).contains(&m.handwriting_iou) {
            return Err(IngestError::InvalidConfig(format!(
                "merge ratios must lie in [0, 1], got containment={} iou={}",
                m.table_containment, m.handwriting_iou
            )));
        }
        if m.vertical_gap.is_nan() || m.vertical_gap < 0.0 {
            return Err(IngestError::InvalidConfig(format!(
                "vertical merge gap must be ≥ 0, got {}",
                m.vertical_gap
            )));
        }
        if let Some((cap, _)) = c.workers.iter().find(|(_, spec)| spec.program.trim().is_empty()) {
            return Err(IngestError::InvalidConfig(format!(
                "worker '{cap}' has an empty program"
            )));
        }
        if let Some(t) = &c.transcript_endpoint {
            if !t.contains("{id}") {
                return Err(IngestError::InvalidConfig(format!(
                    "transcript endpoint must contain '{{id}}': {t}"
                )));
            }
        }
        Ok(self.config)
    }
}
