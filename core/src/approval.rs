//! Approval policy: a pure decision over the command text and the resolved
//! permission set. No state, no I/O.
//!
//! Matching semantics: the command is trimmed and lowercased; a pattern
//! containing `*` or `?` is a glob over the whole command, anything else
//! matches as a whole-token prefix (`git status` matches
//! `git status --short` but not `git status-x`). No semantic parsing of
//! quoting. Block patterns are evaluated first and win in every mode.

use outpost_protocol::ApprovalDecision;
use outpost_protocol::ApprovalVerdict;
use outpost_protocol::ExecutionMode;
use wildmatch::WildMatch;

use crate::permissions::PermissionSet;

/// Read-only commands auto-approved by the default global allow list.
pub const DEFAULT_SAFE_PREFIXES: &[&str] = &[
    "echo", "cat", "ls", "dir", "pwd", "whoami", "hostname", "date", "uname", "type", "which",
    "where", "env", "set", "printenv", "ping", "nslookup", "dig", "curl", "head", "tail", "wc",
    "df", "free", "uptime", "python --version", "python3 --version", "node --version",
    "git status", "git log", "git diff", "git branch", "pip list", "pip show", "npm list",
    "systeminfo", "ver", "Get-Process", "Get-Service", "Get-Date", "Get-ChildItem", "wsl --list",
    "wsl --status",
];

/// Decide whether `command` may run under `mode` with the given permission
/// set.
pub fn decide(mode: ExecutionMode, command: &str, perms: &PermissionSet) -> ApprovalDecision {
    let normalized = normalize(command);

    // Deny wins over every mode, including yolo.
    if let Some(pattern) = find_match(&normalized, &perms.blocked_patterns) {
        return ApprovalDecision {
            verdict: ApprovalVerdict::AutoDenied,
            matched_pattern: Some(pattern.to_string()),
            mode,
        };
    }

    match mode {
        ExecutionMode::Yolo => ApprovalDecision {
            verdict: ApprovalVerdict::AutoApproved,
            matched_pattern: None,
            mode,
        },
        ExecutionMode::Assisted | ExecutionMode::Whitelist => {
            match find_match(&normalized, &perms.allowed_patterns) {
                Some(pattern) => ApprovalDecision {
                    verdict: ApprovalVerdict::AutoApproved,
                    matched_pattern: Some(pattern.to_string()),
                    mode,
                },
                None => ApprovalDecision {
                    verdict: ApprovalVerdict::RequiresApproval,
                    matched_pattern: None,
                    mode,
                },
            }
        }
    }
}

fn normalize(command: &str) -> String {
    command.trim().to_lowercase()
}

/// First pattern matching the normalized command, in list order. Mission
/// patterns sort ahead of global ones in the resolved set, so mission
/// rules take effect first.
fn find_match<'a>(normalized: &str, patterns: &'a [String]) -> Option<&'a str> {
    patterns
        .iter()
        .map(|p| p.as_str())
        .find(|p| pattern_matches(normalized, p))
}

fn pattern_matches(normalized: &str, pattern: &str) -> bool {
    let p = pattern.trim().to_lowercase();
    if p.is_empty() {
        return false;
    }
    if p.contains('*') || p.contains('?') {
        return WildMatch::new(&p).matches(normalized);
    }
    normalized == p
        || normalized.starts_with(&format!("{p} "))
        || normalized.starts_with(&format!("{p}\t"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_protocol::Mission;
    use pretty_assertions::assert_eq;

    use crate::config::AgentConfig;

    fn perms(mode: ExecutionMode, allowed: &[&str], blocked: &[&str]) -> PermissionSet {
        let mut mission = Mission::new("m1", "test");
        mission.execution_mode = Some(mode);
        mission.allowed_patterns = allowed.iter().map(|s| (*s).to_string()).collect();
        mission.blocked_patterns = blocked.iter().map(|s| (*s).to_string()).collect();
        let config = AgentConfig {
            allowed_patterns: Vec::new(),
            blocked_patterns: Vec::new(),
            ..AgentConfig::default()
        };
        PermissionSet::resolve(&mission, &config)
    }

    #[test]
    fn yolo_approves_everything_without_block_match() {
        let p = perms(ExecutionMode::Yolo, &[], &[]);
        for command in ["rm -rf /", "shutdown now", "echo hi", "  git push  "] {
            let decision = decide(ExecutionMode::Yolo, command, &p);
            assert_eq!(decision.verdict, ApprovalVerdict::AutoApproved, "{command}");
        }
    }

    #[test]
    fn block_wins_in_every_mode() {
        for mode in [
            ExecutionMode::Assisted,
            ExecutionMode::Yolo,
            ExecutionMode::Whitelist,
        ] {
            let p = perms(mode, &["shutdown*"], &["shutdown*"]);
            let decision = decide(mode, "shutdown now", &p);
            assert_eq!(decision.verdict, ApprovalVerdict::AutoDenied, "{mode}");
            assert_eq!(decision.matched_pattern.as_deref(), Some("shutdown*"));
            assert_eq!(decision.mode, mode);
        }
    }

    #[test]
    fn whitelist_scenario_from_mission_rules() {
        // allowed ["git *"], blocked ["git push --force"], whitelist mode.
        let p = perms(ExecutionMode::Whitelist, &["git *"], &["git push --force"]);

        let force = decide(ExecutionMode::Whitelist, "git push --force origin main", &p);
        assert_eq!(force.verdict, ApprovalVerdict::AutoDenied);
        assert_eq!(force.matched_pattern.as_deref(), Some("git push --force"));

        let status = decide(ExecutionMode::Whitelist, "git status", &p);
        assert_eq!(status.verdict, ApprovalVerdict::AutoApproved);
        assert_eq!(status.matched_pattern.as_deref(), Some("git *"));

        let rm = decide(ExecutionMode::Whitelist, "rm -rf /", &p);
        assert_eq!(rm.verdict, ApprovalVerdict::RequiresApproval);
        assert_eq!(rm.matched_pattern, None);
    }

    #[test]
    fn assisted_requires_approval_unless_whitelisted() {
        let p = perms(ExecutionMode::Assisted, &["git status"], &[]);
        assert_eq!(
            decide(ExecutionMode::Assisted, "git status --short", &p).verdict,
            ApprovalVerdict::AutoApproved
        );
        assert_eq!(
            decide(ExecutionMode::Assisted, "git push", &p).verdict,
            ApprovalVerdict::RequiresApproval
        );
    }

    #[test]
    fn prefix_matching_is_token_bounded() {
        let p = perms(ExecutionMode::Whitelist, &["git status"], &[]);
        // Prefix must end at a token boundary.
        assert_eq!(
            decide(ExecutionMode::Whitelist, "git status-x", &p).verdict,
            ApprovalVerdict::RequiresApproval
        );
        // Case-insensitive, whitespace-trimmed.
        assert_eq!(
            decide(ExecutionMode::Whitelist, "  GIT STATUS  ", &p).verdict,
            ApprovalVerdict::AutoApproved
        );
    }

    #[test]
    fn default_safe_list_approves_read_only_commands() {
        let mission = Mission {
            execution_mode: Some(ExecutionMode::Whitelist),
            ..Mission::new("m1", "test")
        };
        let p = PermissionSet::resolve(&mission, &AgentConfig::default());
        assert_eq!(
            decide(ExecutionMode::Whitelist, "uptime", &p).verdict,
            ApprovalVerdict::AutoApproved
        );
        assert_eq!(
            decide(ExecutionMode::Whitelist, "rm -rf /", &p).verdict,
            ApprovalVerdict::RequiresApproval
        );
    }
}
