//! Child-process execution: spawn one process per invocation, interleave
//! stdout/stderr reads for live streaming, and enforce the deadline and
//! cancellation paths. Every exit path reaps the child.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::process::Stdio;
use std::time::Duration;
use std::time::Instant;

use chrono::Utc;
use outpost_protocol::AgentEvent;
use outpost_protocol::OutputChunk;
use outpost_protocol::OutputStream;
use outpost_protocol::SessionId;
use tokio::io::AsyncReadExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::process::Command;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::AgentErr;
use crate::error::Result;

// Bytes per pipe read.
const READ_CHUNK_SIZE: usize = 8192;
const AGGREGATE_BUFFER_INITIAL_CAPACITY: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ExecParams {
    pub session_id: SessionId,
    /// Resolved dialect argv with the command text as the final argument.
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub timeout: Duration,
    /// Window between a graceful termination request and the forced kill.
    pub grace_period: Duration,
    /// Cap on each aggregated stream buffer; live chunks are unaffected.
    pub max_output_bytes: usize,
}

/// How the child left. A non-zero clean exit is still `Exited` — it is a
/// normal result, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    Exited(i32),
    /// Abnormal termination by a signal the core did not send.
    Signaled(i32),
    KilledTimeout,
    KilledCancelled,
}

#[derive(Debug)]
pub struct RawExecOutcome {
    pub disposition: ExitDisposition,
    pub duration: Duration,
    /// Sequence number of the last chunk handed to the sink; 0 if none.
    pub last_seq: u64,
    /// True when an aggregate buffer hit `max_output_bytes` and truncated,
    /// or when the pipe drain was abandoned before EOF.
    pub dropped_output: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Forwards live output chunks to the outbound event channel with
/// per-session monotonic sequence numbers.
///
/// The send awaits on the bounded channel: a slow consumer suspends the
/// read loop rather than losing chunks.
pub struct ChunkSink {
    session_id: SessionId,
    tx: async_channel::Sender<AgentEvent>,
    seq: u64,
    first_output: Option<oneshot::Sender<()>>,
}

impl ChunkSink {
    pub fn new(
        session_id: SessionId,
        tx: async_channel::Sender<AgentEvent>,
        first_output: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            session_id,
            tx,
            seq: 0,
            first_output,
        }
    }

    async fn emit(&mut self, stream: OutputStream, data: &[u8]) {
        if let Some(notify) = self.first_output.take() {
            let _ = notify.send(());
        }
        self.seq += 1;
        let chunk = OutputChunk {
            session_id: self.session_id,
            seq: self.seq,
            stream,
            data: data.to_vec(),
            ts: Utc::now(),
        };
        // Err means the consumer is gone; keep aggregating regardless.
        let _ = self.tx.send(AgentEvent::Output(chunk)).await;
    }

    fn last_seq(&self) -> u64 {
        self.seq
    }
}

/// Run one command to a terminal disposition.
///
/// Spawn failure is the only `Err` path; timeout, cancellation, and crash
/// are reported in the outcome so callers keep the aggregated output.
pub async fn run_command(
    params: ExecParams,
    mut sink: Option<ChunkSink>,
    cancel: CancellationToken,
) -> Result<RawExecOutcome> {
    let start = Instant::now();
    let ExecParams {
        session_id,
        argv,
        cwd,
        env,
        timeout,
        grace_period,
        max_output_bytes,
    } = params;

    let (program, args) = argv
        .split_first()
        .ok_or_else(|| AgentErr::InvalidRequest("empty argv".to_string()))?;

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    for (key, value) in env {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(AgentErr::SpawnFailed)?;
    tracing::debug!(session = %session_id, pid = ?child.id(), "spawned child");

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AgentErr::Io(std::io::Error::other("stdout pipe not available")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AgentErr::Io(std::io::Error::other("stderr pipe not available")))?;
    let mut stdout_reader = BufReader::new(stdout);
    let mut stderr_reader = BufReader::new(stderr);

    let mut out_stdout: Vec<u8> = Vec::with_capacity(AGGREGATE_BUFFER_INITIAL_CAPACITY);
    let mut out_stderr: Vec<u8> = Vec::with_capacity(AGGREGATE_BUFFER_INITIAL_CAPACITY);
    let mut dropped_output = false;

    let mut tmp_stdout = [0u8; READ_CHUNK_SIZE];
    let mut tmp_stderr = [0u8; READ_CHUNK_SIZE];
    let mut stdout_open = true;
    let mut stderr_open = true;

    let mut child_finished = false;
    let mut disposition: Option<ExitDisposition> = None;

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    // Drive process exit, deadline, cancellation, and both pipes together.
    while (stdout_open || stderr_open) || !child_finished {
        tokio::select! {
            // Armed even after the child exits: a backgrounded grandchild
            // can inherit the pipes and hold them open past EOF, so the
            // drain must stay interruptible.
            _ = &mut deadline => {
                if child_finished {
                    tracing::warn!(session = %session_id, "pipes still open past the deadline, abandoning drain");
                    if stdout_open || stderr_open {
                        dropped_output = true;
                    }
                } else {
                    tracing::warn!(session = %session_id, ?timeout, "deadline hit, killing child");
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    disposition = Some(ExitDisposition::KilledTimeout);
                    child_finished = true;
                }
                break;
            }

            _ = cancel.cancelled() => {
                if child_finished {
                    if stdout_open || stderr_open {
                        dropped_output = true;
                    }
                } else {
                    terminate_gracefully(&mut child);
                    let reaped = tokio::time::timeout(grace_period, child.wait()).await.is_ok();
                    if !reaped {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                    disposition = Some(ExitDisposition::KilledCancelled);
                    child_finished = true;
                }
                break;
            }

            res = child.wait(), if !child_finished => {
                match res {
                    Ok(status) => disposition = Some(disposition_of(status)),
                    Err(e) => return Err(AgentErr::Io(e)),
                }
                child_finished = true;
            }

            read = stdout_reader.read(&mut tmp_stdout), if stdout_open => {
                match read {
                    Ok(0) => stdout_open = false,
                    Ok(n) => {
                        append_capped(&mut out_stdout, &tmp_stdout[..n], max_output_bytes, &mut dropped_output);
                        if let Some(sink) = sink.as_mut() {
                            sink.emit(OutputStream::Stdout, &tmp_stdout[..n]).await;
                        }
                    }
                    Err(e) => return Err(AgentErr::Io(e)),
                }
            }

            read = stderr_reader.read(&mut tmp_stderr), if stderr_open => {
                match read {
                    Ok(0) => stderr_open = false,
                    Ok(n) => {
                        append_capped(&mut out_stderr, &tmp_stderr[..n], max_output_bytes, &mut dropped_output);
                        if let Some(sink) = sink.as_mut() {
                            sink.emit(OutputStream::Stderr, &tmp_stderr[..n]).await;
                        }
                    }
                    Err(e) => return Err(AgentErr::Io(e)),
                }
            }
        }
    }

    if !child_finished {
        let _ = child.wait().await;
    }

    let disposition = disposition.unwrap_or(ExitDisposition::Exited(0));
    Ok(RawExecOutcome {
        disposition,
        duration: start.elapsed(),
        last_seq: sink.as_ref().map_or(0, ChunkSink::last_seq),
        dropped_output,
        stdout: out_stdout,
        stderr: out_stderr,
    })
}

fn append_capped(dst: &mut Vec<u8>, src: &[u8], cap: usize, dropped: &mut bool) {
    if dst.len() >= cap {
        *dropped = true;
        return;
    }
    let keep = (cap - dst.len()).min(src.len());
    dst.extend_from_slice(&src[..keep]);
    if keep < src.len() {
        *dropped = true;
    }
}

#[cfg(unix)]
fn disposition_of(status: ExitStatus) -> ExitDisposition {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => ExitDisposition::Exited(code),
        None => ExitDisposition::Signaled(status.signal().unwrap_or(-1)),
    }
}

#[cfg(not(unix))]
fn disposition_of(status: ExitStatus) -> ExitDisposition {
    ExitDisposition::Exited(status.code().unwrap_or(-1))
}

/// Ask the child to exit on its own terms before the grace period expires.
#[cfg(unix)]
fn terminate_gracefully(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SIGTERM first; the caller escalates to SIGKILL after the grace
        // period.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate_gracefully(child: &mut Child) {
    let _ = child.start_kill();
}
