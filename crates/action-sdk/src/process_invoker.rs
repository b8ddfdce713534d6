use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;

/// How long output pipes may stay open once the process has exited.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for non-zero process exit codes.
#[derive(Debug, thiserror::Error)]
#[error("Exit code {exit_code} returned from process: file name '{file_name}'{detail}")]
pub struct ProcessExitCodeError {
    pub exit_code: i32,
    pub file_name: String,
    /// Pre-formatted tail of the process' stderr, empty when there was none.
    pub detail: String,
}

/// Everything needed to spawn one child process.
#[derive(Debug, Clone, Default)]
pub struct ProcessRequest {
    pub file_name: PathBuf,
    pub working_directory: Option<PathBuf>,
    /// Variables added on top of the inherited environment.
    pub environment: BTreeMap<String, String>,
    /// Bytes written to the child's stdin before it is closed.
    pub stdin: Option<Vec<u8>>,
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// Spawns a child process, feeds its stdin, reads stdout/stderr on separate
/// tasks and waits for it to exit.
///
/// The child is killed if the returned future is dropped, so callers can
/// bound a run with `tokio::time::timeout`.
#[derive(Debug, Clone, Default)]
pub struct ProcessInvoker;

impl ProcessInvoker {
    pub fn new() -> Self {
        Self
    }

    /// Run the process to completion.
    ///
    /// With `require_exit_code_zero`, a non-zero exit turns into a
    /// [`ProcessExitCodeError`] that quotes the last stderr line.
    pub async fn execute(
        &self,
        request: &ProcessRequest,
        require_exit_code_zero: bool,
    ) -> Result<ProcessOutput> {
        let file_name = request.file_name.display().to_string();
        tracing::debug!("Starting process:");
        tracing::debug!("  File name: '{file_name}'");
        if let Some(dir) = &request.working_directory {
            tracing::debug!("  Working directory: '{}'", dir.display());
        }
        tracing::debug!("  Require exit code zero: '{require_exit_code_zero}'");

        let mut cmd = Command::new(&request.file_name);
        if let Some(dir) = request.working_directory.as_ref().filter(|d| d.is_dir()) {
            cmd.current_dir(dir);
        }
        cmd.envs(&request.environment);
        cmd.stdin(if request.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let start = std::time::Instant::now();
        let mut child = spawn_with_retry(&mut cmd)
            .await
            .with_context(|| format!("Failed to start process '{file_name}'"))?;

        let pid = child.id().unwrap_or(0);
        tracing::debug!("Process started with process id {pid}, waiting for process exit.");

        let stdout_lines = Arc::new(Mutex::new(Vec::new()));
        let mut stdout_task = tokio::spawn(collect_lines(
            child.stdout.take(),
            Arc::clone(&stdout_lines),
            false,
        ));
        let stderr_lines = Arc::new(Mutex::new(Vec::new()));
        let mut stderr_task = tokio::spawn(collect_lines(
            child.stderr.take(),
            Arc::clone(&stderr_lines),
            true,
        ));

        if let (Some(mut stdin), Some(input)) = (child.stdin.take(), request.stdin.clone()) {
            // A child that exits without reading its input closes the pipe
            // early; that is its business, not an invoker failure.
            if let Err(e) = stdin.write_all(&input).await {
                tracing::debug!("Process {pid} did not consume stdin: {e}");
            }
            drop(stdin);
        }

        let status = child
            .wait()
            .await
            .context("Failed to wait for process")?;
        let exit_code = status.code().unwrap_or(-1);

        // Background children inherit the pipes and may hold them open long
        // after the process itself exited.
        let drained = tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, async {
            let _ = (&mut stdout_task).await;
            let _ = (&mut stderr_task).await;
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                "Output of process {pid} still open {OUTPUT_DRAIN_TIMEOUT:?} after exit, \
                 keeping what was read so far"
            );
            stdout_task.abort();
            stderr_task.abort();
        }
        let stdout = std::mem::take(&mut *stdout_lines.lock());
        let stderr = std::mem::take(&mut *stderr_lines.lock());

        tracing::debug!(
            "Finished process {pid} with exit code {exit_code}, and elapsed time {:.2?}.",
            start.elapsed()
        );

        if exit_code != 0 && require_exit_code_zero {
            let detail = stderr
                .iter()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(|l| format!(": {}", l.trim()))
                .unwrap_or_default();
            return Err(ProcessExitCodeError {
                exit_code,
                file_name,
                detail,
            }
            .into());
        }

        Ok(ProcessOutput {
            exit_code,
            stdout,
            stderr,
        })
    }
}

/// Read `pipe` to the end, one line at a time.
///
/// Lines are decoded lossily: a stray non-UTF-8 byte must not stop the
/// drain, or the child would die on its next write to a closed pipe.
async fn collect_lines(
    pipe: Option<impl AsyncRead + Unpin>,
    lines: Arc<Mutex<Vec<String>>>,
    log: bool,
) {
    let Some(pipe) = pipe else { return };
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']).to_string();
                if log {
                    tracing::warn!(target: "action", "{line}");
                }
                lines.lock().push(line);
            }
            Err(e) => {
                tracing::debug!("Failed to read process output: {e}");
                break;
            }
        }
    }
}

// A freshly copied executable can briefly report ETXTBSY while another
// thread's fork still holds the write descriptor.
const ETXTBSY: i32 = 26;
const SPAWN_ATTEMPTS: u32 = 5;

async fn spawn_with_retry(cmd: &mut Command) -> std::io::Result<tokio::process::Child> {
    let mut attempt = 1;
    loop {
        match cmd.spawn() {
            Err(e) if e.raw_os_error() == Some(ETXTBSY) && attempt < SPAWN_ATTEMPTS => {
                tracing::debug!("Executable busy, retrying spawn (attempt {attempt})");
                tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}
