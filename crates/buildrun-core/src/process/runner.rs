//! Tokio-backed process runner.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use super::{EventSender, ProcessEvent, ProcessOutcome, ProcessRunner, RunHandle, RunId};
use crate::config::BuildConfig;
use crate::error::SpawnError;

/// Time a process gets to exit after SIGTERM before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

const CHUNK_SIZE: usize = 8192;

/// Spawns each run as a child process supervised by its own task.
#[derive(Debug, Clone)]
pub struct TokioProcessRunner {
    grace_period: Duration,
}

impl Default for TokioProcessRunner {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }
}

impl ProcessRunner for TokioProcessRunner {
    /// Must be called from within a tokio runtime.
    fn start(&self, run_id: RunId, config: Arc<BuildConfig>, events: EventSender) -> RunHandle {
        let token = CancellationToken::new();
        let handle = RunHandle::new(run_id, token.clone());
        let grace_period = self.grace_period;
        let span = tracing::info_span!(
            "buildrun.process",
            run_id = %run_id,
            command = %config.display_name()
        );

        tokio::spawn(
            async move {
                let outcome = supervise(&config, &token, grace_period).await;
                if events.send(ProcessEvent { run_id, outcome }).is_err() {
                    debug!("Coordinator is gone, dropping process event");
                }
            }
            .instrument(span),
        );

        handle
    }
}

/// Build the command for `config` with piped output and merged environment.
pub fn build_command(config: &BuildConfig) -> Command {
    let mut command = if config.shell {
        shell_command(&shell_line(&config.command, &config.args))
    } else {
        let mut command = Command::new(&config.command);
        command.args(&config.args);
        command
    };

    command
        .current_dir(&config.cwd)
        .envs(&config.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    // Own group, so termination reaches everything the build started.
    #[cfg(unix)]
    command.process_group(0);
    command
}

/// Command and arguments joined by single spaces, unquoted.
fn shell_line(command: &str, args: &[String]) -> String {
    std::iter::once(command)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(unix)]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(line);
    command
}

#[cfg(windows)]
fn shell_command(line: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/C").arg(line);
    command
}

enum Verdict {
    Exited(io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

async fn supervise(
    config: &BuildConfig,
    token: &CancellationToken,
    grace_period: Duration,
) -> ProcessOutcome {
    if token.is_cancelled() {
        return ProcessOutcome::Cancelled;
    }

    let start = Instant::now();
    let mut child = match build_command(config).spawn() {
        Ok(child) => child,
        Err(err) => {
            let err = SpawnError::from_io(&config.command, &err);
            warn!(error = %err, "Build command failed to launch");
            return ProcessOutcome::SpawnFailed(err);
        }
    };
    debug!(pid = child.id(), cwd = %config.cwd.display(), "Build process started");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut output = Vec::new();

    let deadline = async {
        match config.timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let verdict = tokio::select! {
        biased;
        _ = token.cancelled() => Verdict::Cancelled,
        _ = deadline => Verdict::TimedOut,
        status = drive(&mut child, stdout, stderr, &mut output) => Verdict::Exited(status),
    };

    match verdict {
        Verdict::Exited(status) => {
            let code = match status {
                Ok(status) => status.code(),
                Err(err) => {
                    warn!(error = %err, "Failed to wait for build process");
                    None
                }
            };
            ProcessOutcome::Exited {
                code,
                output: decode(&output),
                duration_ms: start.elapsed().as_millis() as u64,
            }
        }
        Verdict::Cancelled => {
            terminate(&mut child, grace_period).await;
            ProcessOutcome::Cancelled
        }
        Verdict::TimedOut => {
            terminate(&mut child, grace_period).await;
            ProcessOutcome::TimedOut {
                output: decode(&output),
                limit_secs: config.timeout.map_or(0, |t| t.as_secs()),
            }
        }
    }
}

/// Read stdout and stderr into one buffer in arrival order, then reap.
async fn drive(
    child: &mut Child,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    output: &mut Vec<u8>,
) -> io::Result<ExitStatus> {
    let mut stdout = stdout;
    let mut stderr = stderr;
    let mut out_chunk = [0u8; CHUNK_SIZE];
    let mut err_chunk = [0u8; CHUNK_SIZE];

    while stdout.is_some() || stderr.is_some() {
        tokio::select! {
            read = read_chunk(&mut stdout, &mut out_chunk) => {
                absorb(read, &mut stdout, &out_chunk, output, "stdout");
            }
            read = read_chunk(&mut stderr, &mut err_chunk) => {
                absorb(read, &mut stderr, &err_chunk, output, "stderr");
            }
        }
    }

    child.wait().await
}

async fn read_chunk<R: AsyncRead + Unpin>(
    stream: &mut Option<R>,
    chunk: &mut [u8],
) -> io::Result<usize> {
    match stream {
        Some(reader) => reader.read(chunk).await,
        None => std::future::pending().await,
    }
}

fn absorb<R>(
    read: io::Result<usize>,
    stream: &mut Option<R>,
    chunk: &[u8],
    output: &mut Vec<u8>,
    name: &'static str,
) {
    match read {
        Ok(0) => *stream = None,
        Ok(n) => output.extend_from_slice(&chunk[..n]),
        Err(err) => {
            warn!(stream = name, error = %err, "Failed to read build output");
            *stream = None;
        }
    }
}

fn decode(output: &[u8]) -> String {
    String::from_utf8_lossy(output).into_owned()
}

/// SIGTERM the build's process group, wait out the grace period, then kill.
async fn terminate(child: &mut Child, grace_period: Duration) {
    let Some(pid) = child.id() else {
        // Already reaped.
        return;
    };

    let stopped = graceful_stop(child, pid, grace_period).await;
    // Sweep members that ignored SIGTERM or outlived the group leader.
    #[cfg(unix)]
    signal_group(pid, "-KILL").await;
    if stopped {
        return;
    }
    if let Err(err) = child.kill().await {
        warn!(error = %err, "Failed to kill build process");
    }
}

#[cfg(unix)]
async fn graceful_stop(child: &mut Child, pid: u32, grace_period: Duration) -> bool {
    if !signal_group(pid, "-TERM").await {
        return false;
    }

    match tokio::time::timeout(grace_period, child.wait()).await {
        Ok(_) => true,
        Err(_) => {
            debug!(pid, "Process outlived its grace period, killing");
            false
        }
    }
}

#[cfg(not(unix))]
async fn graceful_stop(_child: &mut Child, _pid: u32, _grace_period: Duration) -> bool {
    false
}

/// Send `signal` to every process in the group led by `pid`.
#[cfg(unix)]
async fn signal_group(pid: u32, signal: &str) -> bool {
    let sent = Command::new("kill")
        .arg(signal)
        .arg("--")
        .arg(format!("-{}", pid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match sent {
        Ok(_) => true,
        Err(err) => {
            debug!(pid, signal, error = %err, "Could not signal process group");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_line_joins_unquoted() {
        let args = vec!["-j".to_string(), "4".to_string()];
        assert_eq!(shell_line("make", &args), "make -j 4");
        assert_eq!(shell_line("make", &[]), "make");
    }

    #[test]
    fn test_absorb_appends_and_closes() {
        let mut stream = Some(());
        let mut output = Vec::new();

        absorb(Ok(3), &mut stream, b"abcdef", &mut output, "stdout");
        assert_eq!(output, b"abc");
        assert!(stream.is_some());

        absorb(Ok(0), &mut stream, b"", &mut output, "stdout");
        assert!(stream.is_none());
    }

    #[test]
    fn test_decode_is_lossy() {
        assert_eq!(decode(b"ok \xff"), "ok \u{fffd}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pre_cancelled_run_never_spawns() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let config = crate::config::RawBuildConfig::new(format!("touch {}", marker.display()))
            .validate(dir.path(), None)
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let outcome = supervise(&config, &token, DEFAULT_GRACE_PERIOD).await;
        assert_eq!(outcome, ProcessOutcome::Cancelled);
        assert!(!marker.exists());
    }
}
