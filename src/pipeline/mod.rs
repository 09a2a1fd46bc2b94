//! The ingestion state machine.
//!
//! ## Data Flow
//!
//! ```text
//!            ┌─▶ analyzing-layout ─▶ enriching ─┐
//! routed ────┼─▶ processing-media ──────────────┼─▶ completed
//!            └─▶ processing-stream ─────────────┘
//!                      (any stage) ─▶ failed
//! ```
//!
//! 1. [`route`]      - classify the source once; check local files exist
//! 2. layout         - [`crate::layout::LayoutAnalyzer`] per page, then
//!    low-signal text blocks are dropped
//! 3. [`enrich`]     - placeholder blocks go through worker chains
//! 4. [`media`]      - demux + transcription for audio and video
//! 5. [`transcript`] - published transcripts for stream URLs
//! 6. [`normalize`]  - cleanup applied to every worker-produced text
//!
//! A run never returns `Err`. Classification and stage errors end it at
//! `failed` with the stage name and message; worker trouble on a single
//! block is logged, counted and otherwise ignored.

pub mod enrich;
pub mod media;
pub mod normalize;
pub mod route;
pub mod transcript;

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::layout::{AnalyzedPage, DocumentFormat, LayoutAnalyzer, LayoutDetectors, WorkerDetectors};
use crate::output::{
    Page, PipelineResult, PipelineStatus, RagReadyData, RunStats, Stage, TranscriptOrigin, TranscriptRecord,
};
use crate::worker::WorkerPool;
use enrich::{Enricher, PageRaster};
use route::SourceKind;
use transcript::{HttpTranscriptSource, TranscriptSource};

/// Per-run bookkeeping, dropped when the run returns.
struct PipelineState<'a> {
    source: &'a str,
    kind: Option<SourceKind>,
    name: String,
    status: PipelineStatus,
    stats: RunStats,
    started: Instant,
}

impl<'a> PipelineState<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            kind: None,
            name: Path::new(source)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "source".into()),
            status: PipelineStatus::Routed,
            stats: RunStats::default(),
            started: Instant::now(),
        }
    }

    fn advance(&mut self, status: PipelineStatus) {
        debug!(source = self.source, from = %self.status, to = %status, "Run state");
        self.status = status;
    }

    fn finish(mut self, outcome: Result<RagReadyData, (Stage, IngestError)>) -> PipelineResult {
        self.stats.duration_ms = self.started.elapsed().as_millis() as u64;
        let (status, stage, error, data) = match outcome {
            Ok(data) => (PipelineStatus::Completed, None, None, Some(data)),
            Err((stage, e)) => {
                warn!(source = self.source, %stage, kind = e.kind(), error = %e, "Run failed");
                (PipelineStatus::Failed, Some(stage), Some(e.to_string()), None)
            }
        };
        self.advance(status);
        PipelineResult {
            source: self.source.to_string(),
            name: self.name,
            kind: self.kind.as_ref().map(|k| k.label().to_string()),
            status,
            stage,
            error,
            rag_ready_data: data,
            stats: self.stats,
        }
    }
}

/// Drives sources through routing, layout, enrichment or transcription.
///
/// Cheap to share behind an `Arc`; the worker pool inside keeps its
/// processes between runs. Call [`Pipeline::shutdown`] when done.
pub struct Pipeline {
    config: IngestConfig,
    pool: Arc<WorkerPool>,
    detectors: Arc<dyn LayoutDetectors>,
    transcripts: Option<Arc<dyn TranscriptSource>>,
}

impl Pipeline {
    /// Pipeline with a worker pool built from the configured launchers.
    pub fn new(config: IngestConfig) -> Result<Self, IngestError> {
        let pool = Arc::new(config.worker_pool());
        let transcripts: Option<Arc<dyn TranscriptSource>> = match &config.transcript_endpoint {
            Some(endpoint) => Some(Arc::new(HttpTranscriptSource::new(
                endpoint.clone(),
                config.download_timeout_secs,
            )?)),
            None => None,
        };
        Ok(Self {
            detectors: Arc::new(WorkerDetectors::new(Arc::clone(&pool))),
            config,
            pool,
            transcripts,
        })
    }

    /// Share an existing pool. Also resets the detectors to ones backed by
    /// that pool, so call [`Pipeline::with_detectors`] afterwards.
    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.detectors = Arc::new(WorkerDetectors::new(Arc::clone(&pool)));
        self.pool = pool;
        self
    }

    pub fn with_detectors(mut self, detectors: Arc<dyn LayoutDetectors>) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn with_transcript_source(mut self, source: Arc<dyn TranscriptSource>) -> Self {
        self.transcripts = Some(source);
        self
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Stop every worker process.
    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    /// Run one source to `completed` or `failed`.
    pub async fn run(&self, source: &str) -> PipelineResult {
        self.run_with_cancel(source, &CancelToken::new()).await
    }

    /// Like [`Pipeline::run`], stopping at the next boundary once `cancel`
    /// fires.
    pub async fn run_with_cancel(&self, source: &str, cancel: &CancelToken) -> PipelineResult {
        info!("Starting run: {}", source);
        let mut state = PipelineState::new(source);
        let progress = self.config.progress_callback.clone();

        let kind = match self.route(source, cancel) {
            Ok(kind) => kind,
            Err(e) => {
                let result = state.finish(Err((Stage::Routing, e)));
                if let Some(cb) = &progress {
                    cb.on_run_complete(&result.status.to_string(), result.error.as_deref());
                }
                return result;
            }
        };
        state.name = route::output_name(source, &kind);
        state.kind = Some(kind.clone());
        if let Some(cb) = &progress {
            cb.on_run_start(source, kind.label());
        }

        let outcome = match kind {
            SourceKind::Document(format) => self.run_document(source, format, &mut state, cancel).await,
            SourceKind::Media { video } => self
                .run_media(source, video, cancel)
                .await
                .map_err(|e| (Stage::ProcessingMedia, e)),
            SourceKind::Stream { stream_id } => self
                .run_stream(source, &stream_id, cancel)
                .await
                .map_err(|e| (Stage::ProcessingStream, e)),
        };

        let result = state.finish(outcome);
        info!(
            "Run {}: {} ({} blocks, {}ms)",
            result.status, source, result.stats.blocks, result.stats.duration_ms
        );
        if let Some(cb) = &progress {
            cb.on_run_complete(&result.status.to_string(), result.error.as_deref());
        }
        result
    }

    fn route(&self, source: &str, cancel: &CancelToken) -> Result<SourceKind, IngestError> {
        cancel.check(Stage::Routing)?;
        let kind = route::classify(source)?;
        if !matches!(kind, SourceKind::Stream { .. }) {
            route::resolve_local(source)?;
        }
        Ok(kind)
    }

    fn work_dir() -> Result<TempDir, IngestError> {
        tempfile::Builder::new()
            .prefix("ingest-")
            .tempdir()
            .map_err(|e| IngestError::Internal(format!("work directory: {e}")))
    }

    // ── Document path ────────────────────────────────────────────────────

    async fn run_document(
        &self,
        source: &str,
        format: DocumentFormat,
        state: &mut PipelineState<'_>,
        cancel: &CancelToken,
    ) -> Result<RagReadyData, (Stage, IngestError)> {
        let layout_err = |e| (Stage::AnalyzingLayout, e);
        cancel.check(Stage::AnalyzingLayout).map_err(layout_err)?;
        let work_dir = Self::work_dir().map_err(layout_err)?;

        let mut analyzer = LayoutAnalyzer::new(&self.config, &*self.detectors);
        if self.config.visualize {
            analyzer = analyzer.with_annotations(self.config.output_dir.join(&state.name));
            tokio::fs::create_dir_all(self.config.output_dir.join(&state.name))
                .await
                .map_err(|e| {
                    layout_err(IngestError::OutputWriteFailed {
                        path: self.config.output_dir.join(&state.name),
                        source: e,
                    })
                })?;
        }
        let mut pages = analyzer
            .analyze(Path::new(source), format, work_dir.path(), cancel)
            .await
            .map_err(layout_err)?;
        state.advance(PipelineStatus::Analyzed);
        state.stats.pages = pages.len();

        let min_chars = self.config.min_block_chars;
        for page in &mut pages {
            let before = page.blocks.len();
            page.blocks.retain(|b| !b.is_low_signal(min_chars));
            state.stats.dropped_blocks += before - page.blocks.len();
        }

        let pages = self
            .enrich_pages(pages, work_dir.path(), state, cancel)
            .await
            .map_err(|e| (Stage::Enriching, e))?;
        state.stats.blocks = pages.iter().map(|p| p.blocks.len()).sum();
        Ok(RagReadyData::Pages(pages))
    }

    async fn enrich_pages(
        &self,
        pages: Vec<AnalyzedPage>,
        work_dir: &Path,
        state: &mut PipelineState<'_>,
        cancel: &CancelToken,
    ) -> Result<Vec<Page>, IngestError> {
        let total = pages.len();
        let progress = self.config.progress_callback.as_ref();
        if let Some(cb) = progress {
            cb.on_pages_discovered(total);
        }
        let enricher = Enricher::new(&self.pool, work_dir);

        let mut out = Vec::with_capacity(total);
        for AnalyzedPage { rendered, mut blocks } in pages {
            cancel.check(Stage::Enriching)?;
            let raster = if blocks.iter().any(|b| enrich::task_for(b).is_some()) {
                match PageRaster::load(&rendered).await {
                    Ok(r) => Some(r),
                    Err(e) => {
                        warn!(page = rendered.page, error = %e, "Page raster unreadable");
                        None
                    }
                }
            } else {
                None
            };

            for block in &mut blocks {
                cancel.check(Stage::Enriching)?;
                match enricher.enrich(raster.as_ref(), block).await {
                    Ok(true) => state.stats.enriched_blocks += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(page = rendered.page, error = %e, "Block kept its content");
                        state.stats.recoverable_errors += 1;
                        if let Some(cb) = progress {
                            cb.on_block_error(&block.id, &e.to_string());
                        }
                    }
                }
            }

            if let Some(cb) = progress {
                cb.on_page_complete(rendered.page, total, blocks.len());
            }
            out.push(Page {
                page: rendered.page,
                blocks,
            });
        }
        Ok(out)
    }

    // ── Media path ───────────────────────────────────────────────────────

    async fn run_media(&self, source: &str, video: bool, cancel: &CancelToken) -> Result<RagReadyData, IngestError> {
        cancel.check(Stage::ProcessingMedia)?;
        let work_dir = Self::work_dir()?;
        let record = media::transcribe_media(
            &self.pool,
            &self.config.ffmpeg_program,
            self.config.external_timeout,
            Path::new(source),
            video,
            work_dir.path(),
        )
        .await?;
        Ok(RagReadyData::Transcript(vec![record]))
    }

    // ── Stream path ──────────────────────────────────────────────────────

    async fn run_stream(&self, url: &str, stream_id: &str, cancel: &CancelToken) -> Result<RagReadyData, IngestError> {
        cancel.check(Stage::ProcessingStream)?;
        let Some(transcripts) = &self.transcripts else {
            return Err(IngestError::TranscriptUnavailable {
                stream_id: stream_id.to_string(),
                reason: "no transcript endpoint configured".into(),
            });
        };
        let segments = transcripts.fetch(stream_id).await?;
        Ok(RagReadyData::Transcript(vec![TranscriptRecord {
            source: TranscriptOrigin::StreamTranscript,
            file_name: format!("stream_{stream_id}"),
            language: None,
            duration: None,
            url: Some(url.to_string()),
            stream_id: Some(stream_id.to_string()),
            segments,
        }]))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .field("transcripts", &self.transcripts.is_some())
            .finish()
    }
}
