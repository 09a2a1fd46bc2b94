//! One-shot entry points: build a pipeline, run one source, stop the
//! workers.
//!
//! ## Why one-shot helpers?
//!
//! Most callers ingest a single file from a script or a job handler and do
//! not want to manage a [`Pipeline`] and its worker processes. Hosts that
//! ingest many sources should keep one [`Pipeline`] alive instead, so the
//! detector models load once.

use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::output::{write_output, PipelineResult};
use crate::pipeline::Pipeline;

/// Ingest a file path or stream URL.
///
/// # Errors
/// Returns `Err` only when the pipeline cannot be built (bad transcript
/// endpoint). Every failure during the run is reported in the result with
/// `status = failed`.
pub async fn ingest(source: impl AsRef<str>, config: &IngestConfig) -> Result<PipelineResult, IngestError> {
    let pipeline = Pipeline::new(config.clone())?;
    let result = pipeline.run(source.as_ref()).await;
    pipeline.shutdown().await;
    Ok(result)
}

/// Ingest and write `rag_ready_data.json` under `config.output_dir`.
///
/// Returns the result and the written path (`None` for failed runs).
pub async fn ingest_to_dir(
    source: impl AsRef<str>,
    config: &IngestConfig,
) -> Result<(PipelineResult, Option<PathBuf>), IngestError> {
    let result = ingest(source, config).await?;
    let path = write_output(&result, &config.output_dir).await?;
    if let Some(p) = &path {
        info!("Wrote {}", p.display());
    }
    Ok((result, path))
}

/// Synchronous wrapper around [`ingest`].
///
/// Creates a temporary tokio runtime internally.
pub fn ingest_sync(source: impl AsRef<str>, config: &IngestConfig) -> Result<PipelineResult, IngestError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| IngestError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(ingest(source, config))
}

/// Ingest an in-memory file. `extension` (without the dot) picks the
/// processing path, e.g. `"pdf"` or `"mp3"`.
///
/// The bytes are written to a managed temp file that is removed on return.
pub async fn ingest_bytes(
    bytes: &[u8],
    extension: &str,
    config: &IngestConfig,
) -> Result<PipelineResult, IngestError> {
    let mut tmp = tempfile::Builder::new()
        .prefix("ingest-upload-")
        .suffix(&format!(".{}", extension.trim_start_matches('.')))
        .tempfile()
        .map_err(|e| IngestError::Internal(format!("Failed to create temp file: {}", e)))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.flush())
        .map_err(|e| IngestError::Internal(format!("Failed to write temp file: {}", e)))?;
    let path: &Path = tmp.path();
    ingest(path.to_string_lossy(), config).await
}
