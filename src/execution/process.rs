//! Child process runner with output capture, timeouts and group termination

use crate::execution::cancel::CancelToken;
use std::collections::HashMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// How long to keep reading pipes after the shell itself has gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval while waiting for a signalled process group to empty
const REAP_POLL: Duration = Duration::from_millis(20);

/// Limits applied to one shell invocation
#[derive(Debug, Clone, Copy)]
pub struct ProcessLimits {
    /// Wall-clock limit before the process group is terminated
    pub timeout: Duration,

    /// Time between SIGTERM and SIGKILL
    pub grace_period: Duration,

    /// Per-stream capture cap
    pub max_output_bytes: usize,
}

/// How the process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    Exited(i32),
    TimedOut,
    Cancelled,
}

/// Captured result of a shell invocation
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit: ProcessExit,

    /// stdout followed by stderr
    pub output: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit == ProcessExit::Exited(0)
    }
}

enum Wake {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run `script` through `sh -c` in `cwd` with extra environment variables.
///
/// The child runs in its own process group; on timeout or cancellation the
/// whole group receives SIGTERM, then SIGKILL after the grace period. When the
/// shell exits on its own, anything it left running in the group is stopped
/// the same way before the pipes are drained.
pub async fn run_shell(
    script: &str,
    cwd: &Path,
    env: &HashMap<String, String>,
    limits: ProcessLimits,
    cancel: &CancelToken,
) -> std::io::Result<ProcessOutput> {
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(script)
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    own_process_group(&mut command);

    let mut child = command.spawn()?;
    // The id is gone once the child has been waited on
    let pgid = child.id();
    debug!("Spawned shell (pid {:?}): {}", pgid, script);

    let stdout = Capture::spawn(child.stdout.take(), limits.max_output_bytes);
    let stderr = Capture::spawn(child.stderr.take(), limits.max_output_bytes);

    let wake = tokio::select! {
        status = child.wait() => Wake::Exited(status),
        _ = tokio::time::sleep(limits.timeout) => Wake::TimedOut,
        _ = cancel.cancelled() => Wake::Cancelled,
    };

    let exit = match wake {
        Wake::Exited(status) => ProcessExit::Exited(exit_code(status?)),
        Wake::TimedOut => {
            warn!("Process exceeded {:?}, terminating", limits.timeout);
            terminate(&mut child, limits.grace_period).await;
            ProcessExit::TimedOut
        }
        Wake::Cancelled => {
            debug!("Cancellation requested, terminating process");
            terminate(&mut child, limits.grace_period).await;
            ProcessExit::Cancelled
        }
    };

    // Background children keep the pipes open and outlive the step otherwise
    if let Some(pgid) = pgid {
        stop_leftovers(pgid, limits.grace_period).await;
    }

    let stdout = stdout.drain().await;
    let stderr = stderr.drain().await;

    let mut output = stdout;
    if !output.is_empty() && !stderr.is_empty() && !output.ends_with('\n') {
        output.push('\n');
    }
    output.push_str(&stderr);

    Ok(ProcessOutput { exit, output })
}

/// Stop the child's process group: SIGTERM, wait up to `grace`, then SIGKILL
pub async fn terminate(child: &mut Child, grace: Duration) {
    if let Some(pid) = child.id() {
        if signal_group(pid, GroupSignal::Terminate) {
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                debug!("Process group {} terminated gracefully", pid);
                return;
            }
            warn!("Process group {} did not terminate, sending SIGKILL", pid);
            signal_group(pid, GroupSignal::Kill);
        }
    }

    if let Err(e) = child.kill().await {
        debug!("Failed to kill child: {}", e);
    }
}

/// Stop whatever is still running in the group once the shell is gone
async fn stop_leftovers(pgid: u32, grace: Duration) {
    if !group_alive(pgid) {
        return;
    }

    debug!("Shell left processes running in group {}, terminating", pgid);
    signal_group(pgid, GroupSignal::Terminate);
    let waited = tokio::time::timeout(grace, async {
        while group_alive(pgid) {
            tokio::time::sleep(REAP_POLL).await;
        }
    })
    .await;

    if waited.is_err() {
        warn!("Process group {} did not terminate, sending SIGKILL", pgid);
        signal_group(pgid, GroupSignal::Kill);
    }
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

/// Signal every process in the group led by `pgid`
#[cfg(unix)]
fn signal_group(pgid: u32, signal: GroupSignal) -> bool {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let signal = match signal {
        GroupSignal::Terminate => Signal::SIGTERM,
        GroupSignal::Kill => Signal::SIGKILL,
    };
    match signal::kill(Pid::from_raw(-(pgid as i32)), signal) {
        Ok(()) => true,
        Err(e) => {
            debug!("Failed to send {:?} to process group {}: {}", signal, pgid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn signal_group(_pgid: u32, _signal: GroupSignal) -> bool {
    false
}

/// Whether any process in the group led by `pgid` still exists
#[cfg(unix)]
fn group_alive(pgid: u32) -> bool {
    use nix::unistd::Pid;

    nix::sys::signal::kill(Pid::from_raw(-(pgid as i32)), None).is_ok()
}

#[cfg(not(unix))]
fn group_alive(_pgid: u32) -> bool {
    false
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

/// Bytes read so far from one output stream
#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

/// A stream being read in the background into a shared buffer
struct Capture {
    buffer: Arc<Mutex<Captured>>,
    task: tokio::task::JoinHandle<()>,
}

impl Capture {
    fn spawn<R>(reader: Option<R>, cap: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Captured::default()));
        let task = tokio::spawn(read_capped(reader, cap, buffer.clone()));
        Self { buffer, task }
    }

    /// Wait for the stream to close, keeping whatever arrived if it never does
    async fn drain(self) -> String {
        let abort = self.task.abort_handle();
        if tokio::time::timeout(DRAIN_TIMEOUT, self.task).await.is_err() {
            warn!("Output stream still open after {:?}, keeping partial output", DRAIN_TIMEOUT);
            abort.abort();
        }

        let captured = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        let mut text = String::from_utf8_lossy(&captured.bytes).into_owned();
        if captured.truncated {
            text.push_str("\n[output truncated]\n");
        }
        text
    }
}

/// Read a stream to the end, keeping at most `cap` bytes
async fn read_capped<R: AsyncRead + Unpin>(
    reader: Option<R>,
    cap: usize,
    buffer: Arc<Mutex<Captured>>,
) {
    let Some(mut reader) = reader else {
        return;
    };

    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let mut captured = buffer.lock().unwrap_or_else(|e| e.into_inner());
                let room = cap.saturating_sub(captured.bytes.len());
                if n > room {
                    captured.truncated = true;
                }
                captured.bytes.extend_from_slice(&chunk[..n.min(room)]);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::execution::cancel::cancel_pair;
    use std::time::Instant;
    use tokio::io::AsyncWriteExt;

    fn limits(timeout_ms: u64) -> ProcessLimits {
        ProcessLimits {
            timeout: Duration::from_millis(timeout_ms),
            grace_period: Duration::from_millis(200),
            max_output_bytes: 1024,
        }
    }

    #[tokio::test]
    async fn test_captures_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell(
            "echo out; echo err >&2",
            dir.path(),
            &HashMap::new(),
            limits(5_000),
            &CancelToken::never(),
        )
        .await
        .unwrap();

        assert!(out.success());
        assert_eq!(out.output, "out\nerr\n");
    }

    #[tokio::test]
    async fn test_exit_code_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = HashMap::new();
        env.insert("GREETING".to_string(), "hello".to_string());

        let out = run_shell(
            "echo $GREETING; exit 3",
            dir.path(),
            &env,
            limits(5_000),
            &CancelToken::never(),
        )
        .await
        .unwrap();

        assert_eq!(out.exit, ProcessExit::Exited(3));
        assert_eq!(out.output.trim(), "hello");
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let out = run_shell(
            "sleep 30 & sleep 30",
            dir.path(),
            &HashMap::new(),
            limits(200),
            &CancelToken::never(),
        )
        .await
        .unwrap();

        assert_eq!(out.exit, ProcessExit::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancel_stops_process() {
        let dir = tempfile::tempdir().unwrap();
        let (handle, token) = cancel_pair();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel();
        });

        let out = run_shell("sleep 30", dir.path(), &HashMap::new(), limits(30_000), &token)
            .await
            .unwrap();
        assert_eq!(out.exit, ProcessExit::Cancelled);
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_shell(
            "head -c 5000 /dev/zero | tr '\\0' 'a'",
            dir.path(),
            &HashMap::new(),
            limits(5_000),
            &CancelToken::never(),
        )
        .await
        .unwrap();

        assert!(out.success());
        assert!(out.output.contains("[output truncated]"));
        assert!(out.output.len() < 1200);
    }

    #[tokio::test]
    async fn test_background_child_is_stopped_after_exit() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("late");
        let started = Instant::now();
        let out = run_shell(
            "echo hello; (sleep 1; touch late) & sleep 30 &",
            dir.path(),
            &HashMap::new(),
            limits(30_000),
            &CancelToken::never(),
        )
        .await
        .unwrap();

        assert!(out.success());
        assert_eq!(out.output, "hello\n");
        assert!(started.elapsed() < DRAIN_TIMEOUT);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn test_drain_keeps_partial_output() {
        let (reader, mut writer) = tokio::io::duplex(64);
        let capture = Capture::spawn(Some(reader), 1024);
        writer.write_all(b"partial").await.unwrap();

        // The writer stays open, so the drain has to give up
        let text = capture.drain().await;
        assert_eq!(text, "partial");
        drop(writer);
    }
}
