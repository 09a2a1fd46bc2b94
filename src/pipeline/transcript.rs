//! Spoken-transcript streams: fetch the published transcript for a stream id.
//!
//! The fetch sits behind [`TranscriptSource`] so hosts can plug in their own
//! provider (or a fixture in tests). [`HttpTranscriptSource`] GETs a
//! configurable endpoint template such as
//! `https://transcripts.internal/v1/{id}` and expects
//! `[{start, end | duration, text}]` back.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::IngestError;
use crate::output::Segment;

/// Something that can produce the transcript of a stream.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Segments in playback order. "Not found" is
    /// [`IngestError::TranscriptUnavailable`].
    async fn fetch(&self, stream_id: &str) -> Result<Vec<Segment>, IngestError>;
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Read one `{start, end | duration, text}` item. Times are rounded to
/// hundredths of a second.
pub(crate) fn parse_segment(item: &Value) -> Option<Segment> {
    let start = item.get("start").and_then(Value::as_f64)?;
    let end = match item.get("end").and_then(Value::as_f64) {
        Some(end) => end,
        None => start + item.get("duration").and_then(Value::as_f64).unwrap_or(0.0),
    };
    let text = item.get("text").and_then(Value::as_str)?.trim();
    Some(Segment {
        start: round2(start),
        end: round2(end),
        text: text.to_string(),
    })
}

/// Segments from a bare list, or from the first of `keys` holding a list.
pub(crate) fn parse_segments(reply: &Value, keys: &[&str]) -> Vec<Segment> {
    let list = reply
        .as_array()
        .or_else(|| keys.iter().find_map(|k| reply.get(*k).and_then(Value::as_array)));
    list.map(|items| items.iter().filter_map(parse_segment).collect())
        .unwrap_or_default()
}

/// Fetches transcripts from an HTTP endpoint template with an `{id}`
/// placeholder.
#[derive(Debug, Clone)]
pub struct HttpTranscriptSource {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTranscriptSource {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| IngestError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    fn url_for(&self, stream_id: &str) -> String {
        self.endpoint.replace("{id}", stream_id)
    }
}

#[async_trait]
impl TranscriptSource for HttpTranscriptSource {
    async fn fetch(&self, stream_id: &str) -> Result<Vec<Segment>, IngestError> {
        let unavailable = |reason: String| IngestError::TranscriptUnavailable {
            stream_id: stream_id.to_string(),
            reason,
        };
        let url = self.url_for(stream_id);
        info!("Fetching transcript: {}", url);

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                unavailable("request timed out".into())
            } else {
                unavailable(e.to_string())
            }
        })?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(unavailable("no transcript published".into()));
        }
        if !status.is_success() {
            return Err(unavailable(format!("HTTP {status}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| unavailable(format!("unreadable transcript: {e}")))?;
        let segments = parse_segments(&body, &["segments"]);
        if segments.is_empty() {
            return Err(unavailable("transcript is empty".into()));
        }
        debug!(stream_id, segments = segments.len(), "Transcript fetched");
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/transcripts/{{id}}")
    }

    #[test]
    fn segments_take_end_or_duration() {
        let reply = json!([
            {"start": 0.0, "duration": 1.234, "text": " hello "},
            {"start": 1.5, "end": 3.0, "text": "world"},
            {"text": "no start"},
        ]);
        let segments = parse_segments(&reply, &[]);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].end, 1.23);
        assert_eq!(segments[0].text, "hello");
        assert_eq!(segments[1].end, 3.0);
    }

    #[test]
    fn segments_can_be_wrapped() {
        let reply = json!({"blocks": [{"start": 0, "end": 1, "text": "a"}]});
        assert_eq!(parse_segments(&reply, &["segments", "blocks"]).len(), 1);
        assert!(parse_segments(&reply, &["segments"]).is_empty());
    }

    #[tokio::test]
    async fn fetches_and_normalises() {
        let endpoint = serve_once("200 OK", r#"[{"start":1.111,"duration":2,"text":"hi"}]"#).await;
        let source = HttpTranscriptSource::new(endpoint, 5).unwrap();
        let segments = source.fetch("abc").await.unwrap();
        assert_eq!(
            segments,
            vec![Segment {
                start: 1.11,
                end: 3.11,
                text: "hi".into()
            }]
        );
    }

    #[tokio::test]
    async fn not_found_is_unavailable() {
        let endpoint = serve_once("404 Not Found", "{}").await;
        let source = HttpTranscriptSource::new(endpoint, 5).unwrap();
        let err = source.fetch("abc").await.unwrap_err();
        assert!(matches!(err, IngestError::TranscriptUnavailable { ref stream_id, .. } if stream_id == "abc"));
    }

    #[tokio::test]
    async fn empty_list_is_unavailable() {
        let endpoint = serve_once("200 OK", "[]").await;
        let source = HttpTranscriptSource::new(endpoint, 5).unwrap();
        assert!(matches!(
            source.fetch("abc").await,
            Err(IngestError::TranscriptUnavailable { .. })
        ));
    }
}
