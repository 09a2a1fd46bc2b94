//! Output types: the `rag_ready_data` artifact and the run result around it.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::chunk::{self, Chunk, ChunkOptions};
use crate::error::IngestError;

/// One page of a document with its blocks ordered top-to-bottom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-indexed.
    pub page: usize,
    pub blocks: Vec<Block>,
}

/// A timed span of transcript text, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Where a transcript came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptOrigin {
    AudioTranscription,
    StreamTranscript,
}

/// The single record produced for a media file or a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub source: TranscriptOrigin,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    pub segments: Vec<Segment>,
}

/// The artifact handed to indexing: pages for documents, a one-element
/// transcript list for media and streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RagReadyData {
    Pages(Vec<Page>),
    Transcript(Vec<TranscriptRecord>),
}

impl RagReadyData {
    pub fn block_count(&self) -> usize {
        match self {
            RagReadyData::Pages(pages) => pages.iter().map(|p| p.blocks.len()).sum(),
            RagReadyData::Transcript(_) => 0,
        }
    }
}

/// Terminal and intermediate run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Routed,
    Analyzed,
    Completed,
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineStatus::Routed => "routed",
            PipelineStatus::Analyzed => "analyzed",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
        })
    }
}

/// The stage a run is in (or failed in).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Routing,
    AnalyzingLayout,
    ProcessingMedia,
    ProcessingStream,
    Enriching,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Routing => "routing",
            Stage::AnalyzingLayout => "analyzing-layout",
            Stage::ProcessingMedia => "processing-media",
            Stage::ProcessingStream => "processing-stream",
            Stage::Enriching => "enriching",
        })
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub pages: usize,
    pub blocks: usize,
    /// Blocks dropped as low-signal before enrichment.
    pub dropped_blocks: usize,
    /// Blocks whose content a worker replaced.
    pub enriched_blocks: usize,
    /// Per-block failures that left a block unchanged.
    pub recoverable_errors: usize,
    pub duration_ms: u64,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Path or URL as given.
    pub source: String,
    /// Name of the per-source output folder.
    pub name: String,
    /// `document`, `media` or `stream`; absent when classification failed.
    pub kind: Option<String>,
    pub status: PipelineStatus,
    /// Stage that failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_ready_data: Option<RagReadyData>,
    pub stats: RunStats,
}

impl PipelineResult {
    pub fn is_completed(&self) -> bool {
        self.status == PipelineStatus::Completed
    }

    /// Chunks for indexing. Empty unless the run completed.
    pub fn chunks(&self, file_id: &str, options: &ChunkOptions) -> Vec<Chunk> {
        match (&self.status, &self.rag_ready_data) {
            (PipelineStatus::Completed, Some(data)) => chunk::chunk_output(file_id, data, options),
            _ => Vec::new(),
        }
    }

    /// `<output_dir>/<name>/rag_ready_data.json`
    pub fn output_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.name).join("rag_ready_data.json")
    }
}

/// Write `rag_ready_data` to `<output_dir>/<name>/rag_ready_data.json`.
///
/// Uses atomic write (temp file + rename) so readers never see a partial
/// file. Failed runs have nothing to write and return `Ok(None)`.
pub async fn write_output(result: &PipelineResult, output_dir: &Path) -> Result<Option<PathBuf>, IngestError> {
    let Some(data) = &result.rag_ready_data else {
        return Ok(None);
    };
    let path = result.output_path(output_dir);
    let json = serde_json::to_vec_pretty(data)
        .map_err(|e| IngestError::Internal(format!("serialise rag_ready_data: {e}")))?;
    write_atomic(&path, &json).await?;
    Ok(Some(path))
}

/// Write `bytes` to `path` via a sibling `.tmp` file and a rename.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), IngestError> {
    let write_failed = |e: std::io::Error| IngestError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_failed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::geometry::BBox;

    fn completed(data: RagReadyData) -> PipelineResult {
        PipelineResult {
            source: "report.pdf".into(),
            name: "report".into(),
            kind: Some("document".into()),
            status: PipelineStatus::Completed,
            stage: None,
            error: None,
            rag_ready_data: Some(data),
            stats: RunStats::default(),
        }
    }

    #[test]
    fn transcript_record_wire_shape() {
        let rec = TranscriptRecord {
            source: TranscriptOrigin::AudioTranscription,
            file_name: "talk.mp4".into(),
            language: Some("en".into()),
            duration: Some(12.5),
            url: None,
            stream_id: None,
            segments: vec![Segment {
                start: 0.0,
                end: 2.5,
                text: "hello".into(),
            }],
        };
        let v = serde_json::to_value(RagReadyData::Transcript(vec![rec])).unwrap();
        assert_eq!(v[0]["source"], "audio_transcription");
        assert_eq!(v[0]["segments"][0]["end"], 2.5);
        assert!(v[0].get("url").is_none());
    }

    #[test]
    fn untagged_data_reads_back_both_shapes() {
        let pages: RagReadyData = serde_json::from_str(
            r#"[{"page":1,"blocks":[{"id":"p1-b0","type":"text","bbox":[0,0,1,1],"action":"extract_text","content":"hi"}]}]"#,
        )
        .unwrap();
        assert!(matches!(pages, RagReadyData::Pages(ref p) if p[0].blocks.len() == 1));

        let transcript: RagReadyData = serde_json::from_str(
            r#"[{"source":"stream_transcript","file_name":"stream_abc","segments":[]}]"#,
        )
        .unwrap();
        assert!(matches!(transcript, RagReadyData::Transcript(_)));
    }

    #[test]
    fn failed_runs_have_no_chunks() {
        let mut result = completed(RagReadyData::Pages(vec![Page {
            page: 1,
            blocks: vec![Block::text(BBox::new(0.0, 0.0, 10.0, 10.0), "some long enough text")],
        }]));
        assert!(!result.chunks("f1", &ChunkOptions::default()).is_empty());
        result.status = PipelineStatus::Failed;
        assert!(result.chunks("f1", &ChunkOptions::default()).is_empty());
    }

    #[tokio::test]
    async fn write_output_is_atomic_and_nested() {
        let dir = tempfile::tempdir().unwrap();
        let result = completed(RagReadyData::Pages(vec![]));
        let path = write_output(&result, dir.path()).await.unwrap().unwrap();
        assert_eq!(path, dir.path().join("report").join("rag_ready_data.json"));
        assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "[]");
        assert!(!path.with_extension("json.tmp").exists());
    }
}
