use outpost_protocol::ExecutionMode;
use outpost_protocol::MissionId;
use outpost_protocol::SessionId;
use outpost_protocol::ShellDialect;
use thiserror::Error;

pub type Result<T, E = AgentErr> = std::result::Result<T, E>;

/// Failure taxonomy of the execution core. Session-scoped variants are
/// always reported as that session's terminal outcome; only
/// `HistoryUnavailable` halts admission of new work.
#[derive(Debug, Error)]
pub enum AgentErr {
    #[error("shell dialect {dialect} is not available on this host")]
    DialectUnavailable { dialect: ShellDialect },

    #[error("failed to spawn command: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("permission denied ({mode}): {reason}")]
    PermissionDenied {
        mode: ExecutionMode,
        /// Pattern that produced the denial, when one matched.
        matched_pattern: Option<String>,
        reason: String,
    },

    #[error("command timed out after {elapsed_ms}ms (last delivered seq {last_seq})")]
    Timeout { elapsed_ms: u64, last_seq: u64 },

    #[error("command cancelled after {elapsed_ms}ms (last delivered seq {last_seq})")]
    Cancelled { elapsed_ms: u64, last_seq: u64 },

    #[error("approval rejected by operator")]
    ApprovalRejected,

    #[error("backend process crashed (signal {signal})")]
    BackendCrashed { signal: i32 },

    #[error("mission {0} not found")]
    MissionNotFound(MissionId),

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("mission history unavailable, admission halted: {0}")]
    HistoryUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
