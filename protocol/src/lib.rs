//! Wire-level data model shared between the execution core and its external
//! collaborators (transport, mission store, desktop automation).
//!
//! Everything here is plain serde data: no I/O, no runtime state.

mod desktop;
mod exec;
mod mission;

pub use desktop::CapabilityClass;
pub use desktop::DesktopAction;
pub use desktop::DesktopRequest;
pub use desktop::DesktopResult;
pub use desktop::Region;
pub use exec::AgentEvent;
pub use exec::ApprovalDecision;
pub use exec::ApprovalSignal;
pub use exec::ApprovalVerdict;
pub use exec::CommandRequest;
pub use exec::ExecutionResult;
pub use exec::HistoryEntry;
pub use exec::OutputChunk;
pub use exec::OutputStream;
pub use exec::SessionId;
pub use exec::SessionState;
pub use mission::ExecutionMode;
pub use mission::Mission;
pub use mission::MissionId;
pub use mission::ShellDialect;
