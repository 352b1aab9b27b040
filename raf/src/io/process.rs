//! Helpers for running child processes with timeouts and bounded output.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::io::context::ExecContext;

/// How often a waiting child is checked for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// How long output pipes may stay open after the child exited (grandchildren
/// can inherit them).
const READER_GRACE: Duration = Duration::from_secs(5);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    /// Killed because a shutdown was requested.
    pub cancelled: bool,
}

impl CommandOutput {
    pub fn stdout_truncated_notice(&self, label: &str) -> String {
        if self.stdout_truncated > 0 {
            format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            )
        } else {
            String::new()
        }
    }

    pub fn stderr_truncated_notice(&self, label: &str) -> String {
        if self.stderr_truncated > 0 {
            format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            )
        } else {
            String::new()
        }
    }
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. `output_limit_bytes` bounds the amount of
/// stdout/stderr stored in memory (the oldest bytes are dropped so the tail, where agents put
/// their result marker, survives). The timeout starts when the child is spawned. The child is
/// killed on timeout or when `ctx` reports a shutdown; output produced until then is returned.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
    ctx: &ExecContext,
) -> Result<CommandOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };
    let deadline = Instant::now() + timeout;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_tail = SharedTail::default();
    let stderr_tail = SharedTail::default();
    let stdout_handle = spawn_reader(stdout, output_limit_bytes, stdout_tail.clone());
    let stderr_handle = spawn_reader(stderr, output_limit_bytes, stderr_tail.clone());

    if let Some(input) = stdin {
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("stdin was not piped"))?;
        let input = input.to_vec();
        // Written from a thread so a child that never reads cannot stall the timeout.
        thread::spawn(move || {
            if let Err(e) = child_stdin.write_all(&input) {
                warn!(err = %e, "failed to write stdin");
            }
        });
    }

    let mut timed_out = false;
    let mut cancelled = false;
    let status = loop {
        let now = Instant::now();
        if now >= deadline {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            break kill_and_wait(&mut child)?;
        }
        if ctx.is_shutdown_requested() {
            warn!("shutdown requested, killing command");
            cancelled = true;
            break kill_and_wait(&mut child)?;
        }
        let slice = POLL_INTERVAL.min(deadline - now);
        if let Some(status) = child.wait_timeout(slice).context("wait for command")? {
            break status;
        }
    };

    finish_readers(vec![stdout_handle, stderr_handle])?;
    let (stdout, stdout_truncated) = snapshot(&stdout_tail).context("collect stdout")?;
    let (stderr, stderr_truncated) = snapshot(&stderr_tail).context("collect stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, cancelled, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        cancelled,
    })
}

fn kill_and_wait(child: &mut std::process::Child) -> Result<ExitStatus> {
    child.kill().context("kill command")?;
    child.wait().context("wait command after kill")
}

#[derive(Debug, Default)]
struct Tail {
    bytes: Vec<u8>,
    truncated: usize,
}

type SharedTail = Arc<Mutex<Tail>>;

fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    limit: usize,
    tail: SharedTail,
) -> thread::JoinHandle<Result<()>> {
    thread::spawn(move || read_stream_tail(reader, limit, &tail))
}

/// Wait for reader threads, but never longer than [`READER_GRACE`].
fn finish_readers(handles: Vec<thread::JoinHandle<Result<()>>>) -> Result<()> {
    let grace_end = Instant::now() + READER_GRACE;
    while handles.iter().any(|h| !h.is_finished()) {
        if Instant::now() >= grace_end {
            warn!("output pipes still open after exit; using output captured so far");
            return Ok(());
        }
        thread::sleep(Duration::from_millis(20));
    }
    for handle in handles {
        match handle.join() {
            Ok(result) => result?,
            Err(_) => return Err(anyhow!("output reader thread panicked")),
        }
    }
    Ok(())
}

fn snapshot(tail: &SharedTail) -> Result<(Vec<u8>, usize)> {
    let guard = tail
        .lock()
        .map_err(|_| anyhow!("output buffer lock poisoned"))?;
    Ok((guard.bytes.clone(), guard.truncated))
}

/// Drain `reader` into `tail`, keeping only the last `limit` bytes.
fn read_stream_tail<R: Read>(mut reader: R, limit: usize, tail: &SharedTail) -> Result<()> {
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let mut guard = tail
            .lock()
            .map_err(|_| anyhow!("output buffer lock poisoned"))?;
        guard.bytes.extend_from_slice(&chunk[..n]);
        if guard.bytes.len() > limit {
            let excess = guard.bytes.len() - limit;
            guard.bytes.drain(..excess);
            guard.truncated += excess;
        }
    }

    Ok(())
}
