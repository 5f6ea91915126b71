use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::mission::ExecutionMode;
use crate::mission::MissionId;
use crate::mission::ShellDialect;

/// Identifier for one in-flight execution session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One command invocation as delivered by the transport. Immutable once
/// created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Caller-supplied id echoed back on every event for this request.
    pub correlation_id: String,
    pub mission_id: MissionId,
    pub command: String,
    #[serde(default)]
    pub dialect: ShellDialect,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Requested timeout; clamped by the mission cap and the global max.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// Lifecycle of an execution session.
///
/// Transitions are monotonic: `Pending`/`Queued` → `Running` → `Streaming`
/// → one terminal state, never backwards and never out of a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Awaiting a human approval signal.
    Pending,
    /// Approved but held behind the concurrency cap.
    Queued,
    Running,
    /// Process output has started arriving.
    Streaming,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
    Denied,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::Failed
                | SessionState::TimedOut
                | SessionState::Cancelled
                | SessionState::Denied
        )
    }

    /// Position along the state machine, used to enforce forward-only
    /// transitions.
    pub fn rank(self) -> u8 {
        match self {
            SessionState::Pending => 0,
            SessionState::Queued => 1,
            SessionState::Running => 2,
            SessionState::Streaming => 3,
            _ => 4,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Pending => "pending",
            SessionState::Queued => "queued",
            SessionState::Running => "running",
            SessionState::Streaming => "streaming",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
            SessionState::TimedOut => "timed_out",
            SessionState::Cancelled => "cancelled",
            SessionState::Denied => "denied",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Ordered fragment of process output. `seq` is strictly increasing per
/// session, starting at 1, with no gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub session_id: SessionId,
    pub seq: u64,
    pub stream: OutputStream,
    pub data: Vec<u8>,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalVerdict {
    AutoApproved,
    AutoDenied,
    RequiresApproval,
}

/// Outcome of the approval policy for one command, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub verdict: ApprovalVerdict,
    /// Allow/block pattern that produced the verdict, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_pattern: Option<String>,
    /// Mode in effect when the decision was made.
    pub mode: ExecutionMode,
}

/// Asynchronous human decision for a `Pending` session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalSignal {
    Approve,
    Reject,
}

/// Terminal outcome of a session, relayed to the backend and recorded in
/// mission history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub session_id: SessionId,
    pub correlation_id: String,
    pub mission_id: MissionId,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// Sequence number of the last delivered chunk; 0 if none were.
    pub last_seq: u64,
    /// True when the aggregated output buffer hit its cap and was
    /// truncated, or when output streams were abandoned before EOF.
    pub dropped_output: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outbound event stream consumed by the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StateChanged {
        session_id: SessionId,
        correlation_id: String,
        state: SessionState,
    },
    ApprovalRequested {
        session_id: SessionId,
        correlation_id: String,
        mission_id: MissionId,
        command: String,
        mode: ExecutionMode,
    },
    Output(OutputChunk),
    Finished(ExecutionResult),
}

/// Audit record appended to a mission after every terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub ts: DateTime<Utc>,
    pub correlation_id: String,
    pub command: String,
    pub dialect: ShellDialect,
    pub decision: ApprovalDecision,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// First 500 characters of each stream, for quick inspection.
    #[serde(default)]
    pub stdout_preview: String,
    #[serde(default)]
    pub stderr_preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
