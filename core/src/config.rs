use std::path::Path;

use outpost_protocol::ExecutionMode;
use outpost_protocol::ShellDialect;
use serde::Deserialize;
use serde::Serialize;

use crate::approval::DEFAULT_SAFE_PREFIXES;
use crate::error::Result;

const DEFAULT_GLOBAL_MAX_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_GRACE_PERIOD_MS: u64 = 500;
const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 8;
const DEFAULT_MAX_SESSIONS_PER_MISSION: usize = 4;
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Agent-global configuration. Missions may override the mode and tighten
/// the timeout; they can only extend, never replace, the pattern lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub default_execution_mode: ExecutionMode,
    pub default_dialect: ShellDialect,
    /// Hard cap on simultaneously running child processes across all
    /// missions.
    pub max_concurrent_sessions: usize,
    /// Per-mission cap on simultaneously running child processes.
    pub max_sessions_per_mission: usize,
    /// Upper bound on any effective command timeout.
    pub global_max_timeout_secs: u64,
    /// Globally allowed command patterns, evaluated after mission ones.
    pub allowed_patterns: Vec<String>,
    /// Globally blocked command patterns. Deny wins in every mode.
    pub blocked_patterns: Vec<String>,
    /// Cap on the aggregated output retained per stream per session.
    pub max_output_bytes: usize,
    /// Grace window between a termination request and a forced kill.
    pub grace_period_ms: u64,
    /// Capacity of the outbound event channel; the output producer awaits
    /// when it is full (bounded backpressure).
    pub event_buffer: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_execution_mode: ExecutionMode::Assisted,
            default_dialect: ShellDialect::Auto,
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            max_sessions_per_mission: DEFAULT_MAX_SESSIONS_PER_MISSION,
            global_max_timeout_secs: DEFAULT_GLOBAL_MAX_TIMEOUT_SECS,
            allowed_patterns: DEFAULT_SAFE_PREFIXES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            blocked_patterns: Vec::new(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl AgentConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|e| crate::error::AgentErr::InvalidRequest(format!("bad config: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_conservative() {
        let config = AgentConfig::default();
        assert_eq!(config.default_execution_mode, ExecutionMode::Assisted);
        assert_eq!(config.global_max_timeout_secs, 300);
        assert!(config.allowed_patterns.iter().any(|p| p == "git status"));
        assert!(config.blocked_patterns.is_empty());
    }

    #[test]
    fn partial_toml_overrides_merge_with_defaults() {
        let config = AgentConfig::from_toml_str(
            r#"
            default_execution_mode = "yolo"
            max_sessions_per_mission = 2
            blocked_patterns = ["rm -rf *"]
            "#,
        )
        .unwrap_or_else(|e| panic!("parse failed: {e}"));
        assert_eq!(config.default_execution_mode, ExecutionMode::Yolo);
        assert_eq!(config.max_sessions_per_mission, 2);
        assert_eq!(config.blocked_patterns, vec!["rm -rf *".to_string()]);
        // Untouched fields keep their defaults.
        assert_eq!(config.global_max_timeout_secs, 300);
    }

    #[test]
    fn loads_from_a_file() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "global_max_timeout_secs = 60\n")
            .unwrap_or_else(|e| panic!("{e}"));
        let config = AgentConfig::load(&path).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(config.global_max_timeout_secs, 60);
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = AgentConfig::from_toml_str(r#"default_execution_mode = "rampage""#);
        assert!(err.is_err());
    }
}
