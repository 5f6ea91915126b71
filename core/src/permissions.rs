//! Permission bridge: merges global config with mission overrides into a
//! single immutable `PermissionSet`, resolved fresh for every request so a
//! mission edit can never be observed mid-execution.

use std::time::Duration;

use outpost_protocol::CapabilityClass;
use outpost_protocol::ExecutionMode;
use outpost_protocol::Mission;

use crate::config::AgentConfig;

/// Desktop capability flags carried by the resolved set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesktopCaps {
    pub safe_only: bool,
    pub allow_input: bool,
    pub allow_window_mgmt: bool,
}

/// Request-scoped merge of global and mission-level authorization rules.
/// Immutable once resolved; shared by shell execution and desktop actions.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionSet {
    pub mode: ExecutionMode,
    /// Mission patterns first, then global ones.
    pub allowed_patterns: Vec<String>,
    /// Mission patterns first, then global ones. Deny wins over allow.
    pub blocked_patterns: Vec<String>,
    /// `min(mission cap, global max)`, the ceiling for any request.
    pub timeout_cap: Duration,
    pub desktop: DesktopCaps,
}

impl PermissionSet {
    /// Pure merge: identical inputs always yield an identical set.
    pub fn resolve(mission: &Mission, config: &AgentConfig) -> Self {
        let mode = mission
            .execution_mode
            .unwrap_or(config.default_execution_mode);

        let mut allowed_patterns = mission.allowed_patterns.clone();
        allowed_patterns.extend(config.allowed_patterns.iter().cloned());
        let mut blocked_patterns = mission.blocked_patterns.clone();
        blocked_patterns.extend(config.blocked_patterns.iter().cloned());

        let global_max = Duration::from_secs(config.global_max_timeout_secs);
        let timeout_cap = match mission.timeout_cap_secs {
            Some(cap) => Duration::from_secs(cap).min(global_max),
            None => global_max,
        };

        Self {
            mode,
            allowed_patterns,
            blocked_patterns,
            timeout_cap,
            desktop: DesktopCaps {
                safe_only: mission.safe_only,
                allow_input: mission.allow_input,
                allow_window_mgmt: mission.allow_window_mgmt,
            },
        }
    }

    /// Effective execution timeout: the request may only tighten the cap.
    pub fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        match requested {
            Some(t) => t.min(self.timeout_cap),
            None => self.timeout_cap,
        }
    }

    /// Capability predicate for desktop actions. Must hold before the
    /// automation capability is invoked; a denied action never executes.
    pub fn check_capability(&self, class: CapabilityClass) -> Result<(), String> {
        match class {
            CapabilityClass::ReadOnly => Ok(()),
            CapabilityClass::Input => {
                if self.desktop.safe_only {
                    Err("mission is safe_only; input actions are not allowed".to_string())
                } else if !self.desktop.allow_input {
                    Err("input actions are not allowed for this mission".to_string())
                } else {
                    Ok(())
                }
            }
            CapabilityClass::WindowManagement => {
                if self.desktop.safe_only {
                    Err("mission is safe_only; window management is not allowed".to_string())
                } else if !self.desktop.allow_window_mgmt {
                    Err("window management is not allowed for this mission".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}
