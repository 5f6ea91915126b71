use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Opaque mission identifier assigned by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissionId(pub String);

impl MissionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for MissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Approval policy governing whether a command needs human sign-off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Every command requires explicit approval unless whitelisted by the
    /// mission.
    #[default]
    Assisted,
    /// Everything runs without approval; block patterns still apply.
    Yolo,
    /// Allow-matched commands run, block-matched are denied, the rest wait
    /// for approval.
    Whitelist,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionMode::Assisted => "assisted",
            ExecutionMode::Yolo => "yolo",
            ExecutionMode::Whitelist => "whitelist",
        };
        f.write_str(s)
    }
}

/// Shell invocation convention for a spawned command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShellDialect {
    PowerShell,
    Cmd,
    Wsl2,
    Bash,
    Sh,
    /// Pick the host's preferred dialect at execution time.
    #[default]
    Auto,
}

impl fmt::Display for ShellDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShellDialect::PowerShell => "powershell",
            ShellDialect::Cmd => "cmd",
            ShellDialect::Wsl2 => "wsl2",
            ShellDialect::Bash => "bash",
            ShellDialect::Sh => "sh",
            ShellDialect::Auto => "auto",
        };
        f.write_str(s)
    }
}

/// A unit of remote-controlled work with its own permission overrides.
///
/// Missions are created and mutated by an external manager; the core only
/// reads them (fetched fresh per request) and appends history entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mission {
    pub id: MissionId,
    pub label: String,
    /// Overrides the agent-global mode when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_mode: Option<ExecutionMode>,
    /// Command patterns auto-approved for this mission, evaluated before
    /// the global allow list.
    #[serde(default)]
    pub allowed_patterns: Vec<String>,
    /// Command patterns denied for this mission. Deny wins over allow.
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    /// Upper bound on any requested command timeout, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_cap_secs: Option<u64>,
    /// Restrict desktop actions to read-only ones.
    #[serde(default)]
    pub safe_only: bool,
    /// Permit input-class desktop actions (click/type/hotkey/...).
    #[serde(default = "default_true")]
    pub allow_input: bool,
    /// Permit window-management desktop actions.
    #[serde(default = "default_true")]
    pub allow_window_mgmt: bool,
}

fn default_true() -> bool {
    true
}

impl Mission {
    /// A mission with no overrides: global mode, no patterns, full desktop
    /// capabilities.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: MissionId::new(id),
            label: label.into(),
            execution_mode: None,
            allowed_patterns: Vec::new(),
            blocked_patterns: Vec::new(),
            timeout_cap_secs: None,
            safe_only: false,
            allow_input: true,
            allow_window_mgmt: true,
        }
    }
}
