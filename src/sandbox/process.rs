use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use crate::sandbox::{ExecutionResult, Fault};

/// Spawn `bin args..`, feed `payload` to its stdin, capture stdout/stderr,
/// and kill the process if it outlives `timeout`.
///
/// The payload writer and both stream readers run as their own tasks, so a
/// child that fills a pipe before reading its stdin cannot wedge the
/// timeout. Dropping the stdin handle after the write closes the stream,
/// which is the end-of-input signal the child waits for.
pub async fn run_process(
    bin: &str,
    args: &[String],
    payload: Vec<u8>,
    timeout: Duration,
) -> ExecutionResult {
    let mut child = match Command::new(bin)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            return ExecutionResult::fault(Fault::Sandbox(format!("failed to spawn {bin}: {e}")))
        }
    };

    let stdout_task = tokio::spawn(drain(child.stdout.take()));
    let stderr_task = tokio::spawn(drain(child.stderr.take()));

    if let Some(mut stdin) = child.stdin.take() {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&payload).await {
                // Child exited or closed stdin early; its exit status is the
                // authoritative outcome.
                tracing::debug!(error = %e, "payload write to sandbox stdin was cut short");
            }
        });
    }

    let (exit_code, fault) = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => (status.code(), None),
            Err(e) => (
                None,
                Some(Fault::Sandbox(format!("failed to await sandbox process: {e}"))),
            ),
        },
        _ = tokio::time::sleep(timeout) => {
            if let Err(e) = child.start_kill() {
                tracing::warn!(error = %e, "failed to kill timed-out sandbox process");
            }
            let _ = child.wait().await;
            (None, Some(Fault::Timeout))
        }
    };

    // Readers finish once the child's pipes close, including after a kill,
    // so output captured before termination is preserved.
    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    ExecutionResult {
        exit_code,
        stdout,
        stderr,
        fault,
    }
}

async fn drain<R>(stream: Option<R>) -> String
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buf).await {
        tracing::debug!(error = %e, "sandbox output stream ended with an error");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
