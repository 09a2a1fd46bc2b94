//! Audio and video sources: demux (video only) then transcribe.
//!
//! Video goes through ffmpeg to a mono 16 kHz WAV inside the run's work
//! directory. The transcription worker gets the absolute audio path and
//! answers `{language, duration, segments}` (older workers say `blocks`) or
//! `{error}`. The temporary WAV is removed before returning, whatever the
//! outcome.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::error::IngestError;
use crate::external::run_bounded;
use crate::output::{TranscriptOrigin, TranscriptRecord};
use crate::pipeline::transcript::parse_segments;
use crate::worker::{Capability, WorkerPool};

/// Fields of a successful transcription reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub language: Option<String>,
    pub duration: Option<f64>,
    pub segments: Vec<crate::output::Segment>,
}

/// Demux the audio track of `video` to `work_dir/{stem}_audio.wav`.
pub async fn extract_audio(
    ffmpeg: &str,
    video: &Path,
    work_dir: &Path,
    timeout: Duration,
) -> Result<PathBuf, IngestError> {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "media".into());
    let audio = work_dir.join(format!("{stem}_audio.wav"));
    let args: [&OsStr; 9] = [
        OsStr::new("-i"),
        video.as_os_str(),
        OsStr::new("-vn"),
        OsStr::new("-ac"),
        OsStr::new("1"),
        OsStr::new("-ar"),
        OsStr::new("16000"),
        OsStr::new("-y"),
        audio.as_os_str(),
    ];
    let failed = |detail: String| IngestError::MediaExtractionFailed {
        path: video.to_path_buf(),
        detail,
    };
    run_bounded(ffmpeg, args, timeout)
        .await
        .map_err(&failed)?;
    if !audio.exists() {
        return Err(failed(format!("no audio written to {}", audio.display())));
    }
    info!(video = %video.display(), audio = %audio.display(), "Audio track extracted");
    Ok(audio)
}

/// Interpret a transcription reply.
pub fn parse_transcription(reply: &Value) -> Result<Transcription, IngestError> {
    let Some(obj) = reply.as_object() else {
        return Err(IngestError::TranscriptionFailed(format!("unexpected reply: {reply}")));
    };
    if let Some(error) = obj.get("error") {
        let message = error.as_str().map(str::to_string).unwrap_or_else(|| error.to_string());
        return Err(IngestError::TranscriptionFailed(message));
    }
    if obj.is_empty() {
        return Err(IngestError::TranscriptionFailed("empty reply".into()));
    }
    Ok(Transcription {
        language: obj.get("language").and_then(Value::as_str).map(str::to_string),
        duration: obj.get("duration").and_then(Value::as_f64),
        segments: parse_segments(reply, &["segments", "blocks"]),
    })
}

/// Run the media path for `source` and build its transcript record.
pub async fn transcribe_media(
    pool: &WorkerPool,
    ffmpeg: &str,
    external_timeout: Duration,
    source: &Path,
    video: bool,
    work_dir: &Path,
) -> Result<TranscriptRecord, IngestError> {
    let temp_audio = if video {
        Some(extract_audio(ffmpeg, source, work_dir, external_timeout).await?)
    } else {
        None
    };
    let target = temp_audio.as_deref().unwrap_or(source);
    let target = std::path::absolute(target).unwrap_or_else(|_| target.to_path_buf());

    info!(audio = %target.display(), "Transcribing");
    let reply = pool
        .invoke(
            Capability::TranscribeAudio,
            &Value::String(target.to_string_lossy().into_owned()),
        )
        .await;

    if let Some(audio) = &temp_audio {
        if let Err(e) = tokio::fs::remove_file(audio).await {
            warn!(path = %audio.display(), error = %e, "Could not remove temporary audio");
        }
    }

    let value = reply
        .into_result()
        .map_err(|e| IngestError::TranscriptionFailed(e.to_string()))?;
    let transcription = parse_transcription(&value)?;
    info!(
        segments = transcription.segments.len(),
        language = transcription.language.as_deref().unwrap_or("?"),
        "Transcription complete"
    );

    Ok(TranscriptRecord {
        source: TranscriptOrigin::AudioTranscription,
        file_name: source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        language: transcription.language,
        duration: transcription.duration,
        url: None,
        stream_id: None,
        segments: transcription.segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_reply_fails_with_worker_message() {
        let err = parse_transcription(&json!({"error": "decode failed"})).unwrap_err();
        assert_eq!(err.to_string(), "Transcription failed: decode failed");
    }

    #[test]
    fn blocks_alias_is_accepted() {
        let t = parse_transcription(&json!({
            "language": "en",
            "duration": 4.0,
            "blocks": [{"start": 0.0, "end": 2.0, "text": "hello"}],
        }))
        .unwrap();
        assert_eq!(t.language.as_deref(), Some("en"));
        assert_eq!(t.segments.len(), 1);
    }

    #[test]
    fn non_object_or_empty_reply_fails() {
        assert!(parse_transcription(&json!([])).is_err());
        assert!(parse_transcription(&json!({})).is_err());
    }

    #[tokio::test]
    async fn unconfigured_worker_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let audio = dir.path().join("talk.wav");
        std::fs::write(&audio, b"RIFF").unwrap();
        let err = transcribe_media(
            &WorkerPool::empty(),
            "ffmpeg",
            Duration::from_secs(1),
            &audio,
            false,
            dir.path(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, IngestError::TranscriptionFailed(_)));
    }
}
