//! Execution core of the outpost agent: approval policy, permission
//! resolution, shell dialect handling, session lifecycle, and the desktop
//! action gate. Transport and UI layers live in other crates; this one
//! turns authorized command requests into supervised child processes and
//! an ordered event stream.

pub mod approval;
pub mod config;
pub mod desktop;
pub mod error;
pub mod exec;
pub mod permissions;
pub mod sessions;
pub mod shell;
pub mod store;

pub use config::AgentConfig;
pub use desktop::DesktopAutomation;
pub use desktop::DesktopGate;
pub use error::AgentErr;
pub use error::Result;
pub use permissions::PermissionSet;
pub use sessions::SessionManager;
pub use sessions::SessionSummary;
pub use store::InMemoryMissionStore;
pub use store::MissionStore;
