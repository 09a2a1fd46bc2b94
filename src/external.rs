//! One-shot external tools (ffmpeg, LibreOffice) with a hard deadline.

use std::ffi::OsStr;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

/// Run `program args…` to completion within `timeout`.
///
/// stdout is discarded; on failure the last lines of stderr are returned as
/// the error detail. A child that outlives the deadline is killed.
pub async fn run_bounded<I, S>(program: &str, args: I, timeout: Duration) -> Result<(), String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!(program, ?timeout, "Running external tool");

    let child = cmd.spawn().map_err(|e| format!("failed to start '{program}': {e}"))?;
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(format!("'{program}' failed: {e}")),
        // Dropping the future drops the child, which kills it.
        Err(_) => return Err(format!("'{program}' timed out after {timeout:?}")),
    };

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
    let tail: Vec<&str> = tail.into_iter().rev().collect();
    Err(format!("'{program}' exited with {}: {}", output.status, tail.join(" | ")))
}
