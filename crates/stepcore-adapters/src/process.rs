use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use stepcore_runtime::{
    platform, LineCallback, OutputStream, ProcessRequest, Result, StepError, StepHost,
};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::codec::{AnyDelimiterCodec, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long to keep draining output after the process is gone
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs step processes directly on the agent machine
#[derive(Debug, Clone, Copy, Default)]
pub struct HostStepHost;

enum Outcome {
    Exited(ExitStatus),
    Cancelled,
}

#[async_trait]
impl StepHost for HostStepHost {
    async fn execute(
        &self,
        request: ProcessRequest,
        on_line: LineCallback,
        cancellation: CancellationToken,
    ) -> Result<i32> {
        let mut environment = request.environment.clone();
        if let Some(path) = host_path(&request) {
            environment.insert("PATH".to_string(), path);
        }

        let mut cmd = Command::new(&request.file_name);
        apply_arguments(&mut cmd, &request.arguments);
        cmd.current_dir(&request.working_directory)
            .envs(&environment)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if request.standard_input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| StepError::Spawn {
            file_name: request.file_name.clone(),
            source,
        })?;
        debug!(pid = ?child.id(), file = %request.file_name.display(), "process started");

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(pump_lines(out, OutputStream::Stdout, on_line.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(pump_lines(err, OutputStream::Stderr, on_line.clone())));

        if let (Some(input), Some(mut stdin)) = (request.standard_input, child.stdin.take()) {
            // Written from a task so a child that never reads stdin cannot stall us
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    warn!(error = %e, "Failed to write standard input");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status?),
            _ = cancellation.cancelled() => Outcome::Cancelled,
        };

        match outcome {
            Outcome::Exited(status) => {
                drain(stdout_task).await;
                drain(stderr_task).await;
                let code = exit_code(status);
                debug!(exit_code = code, "process exited");
                Ok(code)
            }
            Outcome::Cancelled => {
                info!(pid = ?child.id(), "cancellation requested; terminating process tree");
                let killed = terminate_tree(&mut child).await;
                if !killed && request.continue_after_cancel_kill_attempt {
                    warn!("kill attempt failed; not waiting for the process to exit");
                } else {
                    let _ = child.wait().await;
                    drain(stdout_task).await;
                    drain(stderr_task).await;
                }
                Err(StepError::Cancelled)
            }
        }
    }
}

/// Prepend entries ahead of the step's PATH, or the agent's own PATH
fn host_path(request: &ProcessRequest) -> Option<String> {
    if request.prepend_path.is_empty() {
        return None;
    }
    let separator = platform::host().path_separator.to_string();
    let mut path = request.prepend_path.join(&separator);
    let existing = request
        .environment
        .get("PATH")
        .cloned()
        .or_else(|| std::env::var("PATH").ok())
        .filter(|p| !p.is_empty());
    if let Some(existing) = existing {
        path.push_str(&separator);
        path.push_str(&existing);
    }
    Some(path)
}

/// Forward each line of a process stream to the callback as it arrives
async fn pump_lines<R>(reader: R, stream: OutputStream, on_line: LineCallback)
where
    R: AsyncRead + Unpin,
{
    let codec = AnyDelimiterCodec::new(b"\n".to_vec(), b"\n".to_vec());
    let mut lines = FramedRead::new(reader, codec);
    while let Some(item) = lines.next().await {
        match item {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                let line = text.strip_suffix('\r').unwrap_or(&text);
                on_line(stream, line);
            }
            Err(e) => {
                warn!(error = %e, ?stream, "Failed to read process output");
                break;
            }
        }
    }
}

async fn drain(task: Option<JoinHandle<()>>) {
    if let Some(task) = task {
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, task).await.is_err() {
            warn!("output still open after process exit; giving up on remaining lines");
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Kill the child and everything it started; returns false if no kill took effect
async fn terminate_tree(child: &mut Child) -> bool {
    if let Some(pid) = child.id() {
        if kill_process_group(pid).await {
            return true;
        }
    }
    match child.start_kill() {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Failed to kill process");
            false
        }
    }
}

#[cfg(unix)]
async fn kill_process_group(pid: u32) -> bool {
    // The child leads its own process group (process_group(0) at spawn)
    Command::new("kill")
        .args(["-s", "KILL", "--", &format!("-{pid}")])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(windows)]
async fn kill_process_group(pid: u32) -> bool {
    Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(windows)]
fn apply_arguments(cmd: &mut Command, arguments: &str) {
    cmd.raw_arg(arguments);
}

#[cfg(not(windows))]
fn apply_arguments(cmd: &mut Command, arguments: &str) {
    cmd.args(split_arguments(arguments));
}

/// Split a formatted argument string into argv.
/// Whitespace separates arguments outside double quotes; `\"` is a literal quote.
pub fn split_arguments(arguments: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;
    let mut chars = arguments.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
                has_token = true;
            }
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}

/// Quote a path for inclusion in a formatted argument string
pub fn quote_argument(path: &Path) -> String {
    format!("\"{}\"", path.display().to_string().replace('"', "\\\""))
}
