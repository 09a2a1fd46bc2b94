//! Line framing for the worker channel.
//!
//! One value per line in each direction. Objects and arrays go out as compact
//! JSON; strings go out bare because workers expect a plain path. The literal
//! `EXIT` line is reserved for shutdown.

use serde_json::Value;

use crate::error::WorkerError;

/// The only shutdown signal a worker understands.
pub const EXIT_TOKEN: &str = "EXIT";

/// Frame `payload` as a single request line, without the trailing newline.
///
/// Bare strings must be non-empty, single-line and different from
/// [`EXIT_TOKEN`]; anything else is serialised as compact JSON, which never
/// contains a raw newline.
pub fn encode_request(payload: &Value) -> Result<String, WorkerError> {
    match payload {
        Value::String(s) => {
            if s.is_empty() {
                return Err(WorkerError::InvalidPayload("empty string".into()));
            }
            if s.contains('\n') || s.contains('\r') {
                return Err(WorkerError::InvalidPayload(format!(
                    "string payload contains a line break: {s:?}"
                )));
            }
            if s.trim() == EXIT_TOKEN {
                return Err(WorkerError::InvalidPayload(
                    "'EXIT' is reserved for shutdown".into(),
                ));
            }
            Ok(s.clone())
        }
        other => serde_json::to_string(other).map_err(|e| WorkerError::InvalidPayload(e.to_string())),
    }
}

/// Parse one response line (trailing newline optional).
pub fn decode_reply(line: &str) -> Result<Value, String> {
    let trimmed = line.trim_end_matches(['\n', '\r']);
    serde_json::from_str(trimmed).map_err(|e| format!("{e} (line: {:?})", truncate(trimmed, 80)))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strings_are_sent_bare() {
        let line = encode_request(&json!("/tmp/page_1.png")).unwrap();
        assert_eq!(line, "/tmp/page_1.png");
    }

    #[test]
    fn objects_are_single_line_json() {
        let line = encode_request(&json!({"path": "a\nb", "n": 1})).unwrap();
        assert!(!line.contains('\n'));
        let back: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(back["path"], "a\nb");
    }

    #[test]
    fn exit_is_rejected_as_payload() {
        assert!(matches!(
            encode_request(&json!("EXIT")),
            Err(WorkerError::InvalidPayload(_))
        ));
    }

    #[test]
    fn multi_line_strings_are_rejected() {
        assert!(encode_request(&json!("a\nb")).is_err());
        assert!(encode_request(&json!("a\r")).is_err());
        assert!(encode_request(&json!("")).is_err());
    }

    #[test]
    fn decode_accepts_trailing_newline() {
        assert_eq!(decode_reply("{\"ok\":true}\r\n").unwrap(), json!({"ok": true}));
        assert_eq!(decode_reply("[]\n").unwrap(), json!([]));
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_reply("Loading model...\n").unwrap_err();
        assert!(err.contains("Loading model"));
    }
}
