//! Long-lived detector processes, one per capability.
//!
//! ## Why out-of-process workers?
//!
//! The detection and recognition models are heavy, live in their own
//! runtimes and take seconds to load. Keeping each one in a resident child
//! process pays that cost once per run (or once per host process) and keeps
//! a crashing model from taking the pipeline down with it.
//!
//! ## Failure model
//!
//! [`WorkerPool::invoke`] never returns an error. A worker that cannot be
//! started, does not answer in time, or answers with something that is not
//! JSON yields [`WorkerReply::Unavailable`], which callers treat like an
//! empty result. A worker that died between calls (EOF on its stdout, closed
//! stdin) is restarted once within the same call and the request is re-sent.
//! A worker that times out or sends a malformed line is killed, so a late or
//! leftover reply can never be read as the answer to the next request.
//! Respawning a process found exited at the start of a call counts as that
//! call's one restart.
//!
//! ## Locking
//!
//! The capability→slot map sits behind one short-held mutex used only for
//! lookup and insert. Each slot has its own async mutex held for the whole
//! round trip, which gives every capability at most one request in flight
//! while different capabilities run concurrently.

pub mod protocol;

use std::collections::HashMap;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use protocol::{decode_reply, encode_request, EXIT_TOKEN};

// ── Capabilities ─────────────────────────────────────────────────────────

/// A named worker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    DetectTables,
    DetectHandwriting,
    RecognizeText,
    ReconstructTable,
    DescribeImage,
    TranscribeAudio,
}

impl Capability {
    pub const ALL: [Capability; 6] = [
        Capability::DetectTables,
        Capability::DetectHandwriting,
        Capability::RecognizeText,
        Capability::ReconstructTable,
        Capability::DescribeImage,
        Capability::TranscribeAudio,
    ];

    /// Name used on the command line and in logs.
    pub fn wire_name(self) -> &'static str {
        match self {
            Capability::DetectTables => "detect-tables",
            Capability::DetectHandwriting => "detect-handwriting",
            Capability::RecognizeText => "recognize-text",
            Capability::ReconstructTable => "reconstruct-table",
            Capability::DescribeImage => "describe-image",
            Capability::TranscribeAudio => "transcribe-audio",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.wire_name() == s.trim())
            .ok_or_else(|| {
                let known: Vec<_> = Capability::ALL.iter().map(|c| c.wire_name()).collect();
                format!("unknown capability '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

// ── Launch specs ─────────────────────────────────────────────────────────

/// How to start the process behind a capability.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WorkerSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl WorkerSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run `script` through `sh -c`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    /// Split a whitespace-separated command line such as
    /// `python3 workers/ocr_worker.py`. No quoting rules apply.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self {
            program: program.to_string(),
            args: parts.map(str::to_string).collect(),
            env: Vec::new(),
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }
}

// ── Replies ──────────────────────────────────────────────────────────────

/// Outcome of one [`WorkerPool::invoke`].
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReply {
    Value(Value),
    Unavailable(WorkerError),
}

impl WorkerReply {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, WorkerReply::Unavailable(_))
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            WorkerReply::Value(v) => Some(v),
            WorkerReply::Unavailable(_) => None,
        }
    }

    /// Value, or the reason there is none.
    pub fn into_result(self) -> Result<Value, WorkerError> {
        match self {
            WorkerReply::Value(v) => Ok(v),
            WorkerReply::Unavailable(e) => Err(e),
        }
    }
}

// ── Process handle ───────────────────────────────────────────────────────

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Why a round trip did not produce a value.
enum RoundTripFailure {
    /// The process is gone; a restart may help.
    Dead(WorkerError),
    /// The process answered, but not with JSON. Whatever it writes next
    /// cannot be matched to a request, so the process is discarded.
    Malformed(String),
}

impl WorkerProcess {
    fn spawn(capability: Capability, spec: &WorkerSpec) -> Result<Self, WorkerError> {
        let spawn_failed = |detail: String| WorkerError::SpawnFailed {
            capability: capability.to_string(),
            detail,
        };
        let mut child = spec
            .command()
            .spawn()
            .map_err(|e| spawn_failed(format!("{}: {e}", spec.program)))?;
        let stdin = child.stdin.take().ok_or_else(|| spawn_failed("stdin not piped".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| spawn_failed("stdout not piped".into()))?;
        info!(%capability, pid = ?child.id(), program = %spec.program, "Worker started");
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    async fn round_trip(&mut self, capability: Capability, line: &str) -> Result<Value, RoundTripFailure> {
        let write_failed = |e: std::io::Error| {
            RoundTripFailure::Dead(WorkerError::WriteFailed {
                capability: capability.to_string(),
                detail: e.to_string(),
            })
        };
        self.stdin.write_all(line.as_bytes()).await.map_err(write_failed)?;
        self.stdin.write_all(b"\n").await.map_err(write_failed)?;
        self.stdin.flush().await.map_err(write_failed)?;

        let mut buf = String::new();
        let n = self
            .stdout
            .read_line(&mut buf)
            .await
            .map_err(|_| RoundTripFailure::Dead(WorkerError::ClosedStream(capability.to_string())))?;
        if n == 0 {
            return Err(RoundTripFailure::Dead(WorkerError::ClosedStream(capability.to_string())));
        }
        decode_reply(&buf).map_err(RoundTripFailure::Malformed)
    }

    async fn kill(mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "Kill of worker failed (already gone?)");
        }
    }

    /// Send `EXIT`, wait up to `grace`, then kill.
    async fn stop(mut self, capability: Capability, grace: Duration) -> Option<ExitStatus> {
        let sent = async {
            self.stdin.write_all(EXIT_TOKEN.as_bytes()).await?;
            self.stdin.write_all(b"\n").await?;
            self.stdin.flush().await
        }
        .await;
        if sent.is_ok() {
            if let Ok(Ok(status)) = tokio::time::timeout(grace, self.child.wait()).await {
                debug!(%capability, ?status, "Worker exited");
                return Some(status);
            }
        }
        warn!(%capability, "Worker did not exit within grace period, killing");
        self.kill().await;
        None
    }
}

// ── Pool ─────────────────────────────────────────────────────────────────

type Slot = Arc<tokio::sync::Mutex<Option<WorkerProcess>>>;

/// Capability → resident worker process.
///
/// Create one per host process and share it behind an `Arc`; workers
/// survive across pipeline runs until [`WorkerPool::shutdown`] or drop.
pub struct WorkerPool {
    launchers: HashMap<Capability, WorkerSpec>,
    slots: Mutex<HashMap<Capability, Slot>>,
    timeout: Duration,
    grace: Duration,
}

impl WorkerPool {
    pub fn new(launchers: HashMap<Capability, WorkerSpec>, timeout: Duration, grace: Duration) -> Self {
        Self {
            launchers,
            slots: Mutex::new(HashMap::new()),
            timeout,
            grace,
        }
    }

    /// Pool with no launchers: every invoke is unavailable.
    pub fn empty() -> Self {
        Self::new(HashMap::new(), Duration::from_secs(1), Duration::from_secs(1))
    }

    pub fn is_configured(&self, capability: Capability) -> bool {
        self.launchers.contains_key(&capability)
    }

    fn slot(&self, capability: Capability) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(capability).or_default().clone()
    }

    /// Send one request and await one reply.
    pub async fn invoke(&self, capability: Capability, payload: &Value) -> WorkerReply {
        let line = match encode_request(payload) {
            Ok(line) => line,
            Err(e) => return WorkerReply::Unavailable(e),
        };
        let Some(spec) = self.launchers.get(&capability) else {
            return WorkerReply::Unavailable(WorkerError::NotConfigured(capability.to_string()));
        };

        let slot = self.slot(capability);
        let mut guard = slot.lock().await;
        let mut restarted = false;

        loop {
            let needs_start = match guard.as_mut() {
                Some(worker) => {
                    if worker.has_exited() {
                        // Replacing a cached process that exited is this
                        // invoke's one restart.
                        debug!(%capability, "Cached worker has exited, restarting");
                        restarted = true;
                        true
                    } else {
                        false
                    }
                }
                None => true,
            };
            if needs_start {
                match WorkerProcess::spawn(capability, spec) {
                    Ok(worker) => *guard = Some(worker),
                    Err(e) => {
                        warn!(%capability, error = %e, "Worker unavailable");
                        *guard = None;
                        return WorkerReply::Unavailable(e);
                    }
                }
            }
            let Some(worker) = guard.as_mut() else {
                return WorkerReply::Unavailable(WorkerError::ClosedStream(capability.to_string()));
            };

            debug!(%capability, request = %line, "Worker request");
            match tokio::time::timeout(self.timeout, worker.round_trip(capability, &line)).await {
                Ok(Ok(value)) => return WorkerReply::Value(value),
                Ok(Err(RoundTripFailure::Malformed(detail))) => {
                    warn!(%capability, %detail, "Worker sent malformed reply, killing");
                    if let Some(stale) = guard.take() {
                        stale.kill().await;
                    }
                    return WorkerReply::Unavailable(WorkerError::MalformedReply {
                        capability: capability.to_string(),
                        detail,
                    });
                }
                Ok(Err(RoundTripFailure::Dead(err))) => {
                    if let Some(dead) = guard.take() {
                        dead.kill().await;
                    }
                    if restarted {
                        warn!(%capability, error = %err, "Worker died again after restart");
                        return WorkerReply::Unavailable(err);
                    }
                    warn!(%capability, error = %err, "Worker died, restarting once");
                    restarted = true;
                }
                Err(_elapsed) => {
                    warn!(%capability, timeout = ?self.timeout, "Worker timed out, killing");
                    if let Some(stale) = guard.take() {
                        stale.kill().await;
                    }
                    return WorkerReply::Unavailable(WorkerError::Timeout {
                        capability: capability.to_string(),
                        timeout: self.timeout,
                    });
                }
            }
        }
    }

    /// Number of capabilities with a live process.
    pub async fn running(&self) -> usize {
        let slots: Vec<Slot> = {
            let map = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.values().cloned().collect()
        };
        let mut n = 0;
        for slot in slots {
            if let Some(worker) = slot.lock().await.as_mut() {
                if !worker.has_exited() {
                    n += 1;
                }
            }
        }
        n
    }

    /// Send `EXIT` to every running worker, wait the grace period, kill
    /// laggards. The pool stays usable; the next invoke starts fresh.
    pub async fn shutdown(&self) {
        let slots: Vec<(Capability, Slot)> = {
            let mut map = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.drain().collect()
        };
        let stops = slots.into_iter().map(|(capability, slot)| async move {
            if let Some(worker) = slot.lock().await.take() {
                worker.stop(capability, self.grace).await;
            }
        });
        futures::future::join_all(stops).await;
        info!("Worker pool shut down");
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut caps: Vec<_> = self.launchers.keys().map(|c| c.wire_name()).collect();
        caps.sort_unstable();
        f.debug_struct("WorkerPool")
            .field("capabilities", &caps)
            .field("timeout", &self.timeout)
            .field("grace", &self.grace)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn capability_names_round_trip() {
        for cap in Capability::ALL {
            assert_eq!(cap.wire_name().parse::<Capability>().unwrap(), cap);
        }
        assert!("ocr".parse::<Capability>().is_err());
    }

    #[test]
    fn command_line_is_split_on_whitespace() {
        let spec = WorkerSpec::from_command_line("python3  workers/ocr.py --fast").unwrap();
        assert_eq!(spec.program, "python3");
        assert_eq!(spec.args, vec!["workers/ocr.py", "--fast"]);
        assert!(WorkerSpec::from_command_line("   ").is_none());
    }

    #[tokio::test]
    async fn unconfigured_capability_is_unavailable() {
        let pool = WorkerPool::empty();
        let reply = pool.invoke(Capability::DescribeImage, &json!("/tmp/x.png")).await;
        assert_eq!(
            reply,
            WorkerReply::Unavailable(WorkerError::NotConfigured("describe-image".into()))
        );
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let mut launchers = HashMap::new();
        launchers.insert(
            Capability::RecognizeText,
            WorkerSpec::new("/nonexistent/definitely-not-a-worker"),
        );
        let pool = WorkerPool::new(launchers, Duration::from_secs(1), Duration::from_millis(100));
        let reply = pool.invoke(Capability::RecognizeText, &json!("/tmp/x.png")).await;
        assert!(matches!(reply, WorkerReply::Unavailable(WorkerError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn invalid_payload_never_reaches_worker() {
        let pool = WorkerPool::empty();
        let reply = pool.invoke(Capability::RecognizeText, &json!("EXIT")).await;
        assert!(matches!(reply, WorkerReply::Unavailable(WorkerError::InvalidPayload(_))));
    }
}
