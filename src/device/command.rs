//! Helpers for drivers backed by external capture tools.
//!
//! The SBC and USB camera drivers shell out to vendor tools that own the
//! sensor pipeline. Every invocation is bounded by a timeout and the child is
//! killed if the future is dropped, so a wedged tool cannot hold the camera
//! lock forever.

use crate::error::{RigError, RigResult};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Run `program` with `args` and return its raw output, whatever the exit status.
///
/// Fails only when the tool cannot be spawned or exceeds `timeout`.
pub async fn run_tool(program: &str, args: &[String], timeout: Duration) -> RigResult<Output> {
    debug!(program, ?args, ?timeout, "Running capture tool");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RigError::operation(program, format!("failed to spawn: {}", e)))?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(RigError::operation(program, e)),
        Err(_) => Err(RigError::operation(
            program,
            format!("timed out after {:?}", timeout),
        )),
    }
}

/// Run a tool and require a zero exit status; returns stdout.
pub async fn run_checked(program: &str, args: &[String], timeout: Duration) -> RigResult<Vec<u8>> {
    let output = run_tool(program, args, timeout).await?;
    if output.status.success() {
        return Ok(output.stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let detail = stderr.lines().last().unwrap_or("").trim();
    Err(RigError::operation(
        program,
        format!("exited with {}: {}", output.status, detail),
    ))
}

/// Combined stdout and stderr as text, for tools that report on either stream.
pub fn output_text(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    text
}
