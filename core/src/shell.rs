//! Shell dialect detection and resolution.
//!
//! Each dialect maps to the argv prefix for its invocation convention; the
//! command text is always appended as a single final argument.

use std::collections::BTreeMap;
use std::path::Path;

use outpost_protocol::ShellDialect;

use crate::error::AgentErr;
use crate::error::Result;

/// Argv prefix for invoking a dialect, e.g. `["/bin/bash", "-c"]`.
pub type DialectInvocation = Vec<String>;

fn argv(parts: &[&str]) -> DialectInvocation {
    parts.iter().map(|s| (*s).to_string()).collect()
}

/// Probe the host for installed shells.
///
/// Windows: pwsh/powershell, cmd.exe, and `wsl` when present. Elsewhere:
/// /bin/bash, /bin/sh, and pwsh if installed; a Linux host running inside
/// WSL also reports the wsl2 dialect (backed by bash).
pub fn detect_available_dialects() -> BTreeMap<ShellDialect, DialectInvocation> {
    let mut available = BTreeMap::new();

    if cfg!(target_os = "windows") {
        for ps in ["pwsh", "powershell"] {
            if which::which(ps).is_ok() {
                available.insert(
                    ShellDialect::PowerShell,
                    argv(&[ps, "-NoProfile", "-NonInteractive", "-Command"]),
                );
                break;
            }
        }
        available.insert(ShellDialect::Cmd, argv(&["cmd.exe", "/C"]));
        if which::which("wsl").is_ok() {
            available.insert(ShellDialect::Wsl2, argv(&["wsl", "--", "bash", "-c"]));
        }
    } else {
        if Path::new("/bin/bash").exists() {
            available.insert(ShellDialect::Bash, argv(&["/bin/bash", "-c"]));
        }
        if Path::new("/bin/sh").exists() {
            available.insert(ShellDialect::Sh, argv(&["/bin/sh", "-c"]));
        }
        if is_wsl() {
            available.insert(ShellDialect::Wsl2, argv(&["/bin/bash", "-c"]));
        }
        if which::which("pwsh").is_ok() {
            available.insert(
                ShellDialect::PowerShell,
                argv(&["pwsh", "-NoProfile", "-NonInteractive", "-Command"]),
            );
        }
    }

    available
}

/// True when running inside a WSL guest.
pub fn is_wsl() -> bool {
    std::fs::read_to_string("/proc/version")
        .map(|v| v.to_lowercase().contains("microsoft"))
        .unwrap_or(false)
}

/// Resolve a requested dialect against the detected set. An explicit
/// dialect must be installed; `Auto` prefers PowerShell then Cmd on
/// Windows, Bash then Sh elsewhere, falling back to anything available.
pub fn resolve_dialect(
    requested: ShellDialect,
    available: &BTreeMap<ShellDialect, DialectInvocation>,
) -> Result<(ShellDialect, DialectInvocation)> {
    if requested != ShellDialect::Auto {
        return match available.get(&requested) {
            Some(invocation) => Ok((requested, invocation.clone())),
            None => Err(AgentErr::DialectUnavailable { dialect: requested }),
        };
    }

    let preference: &[ShellDialect] = if cfg!(target_os = "windows") {
        &[ShellDialect::PowerShell, ShellDialect::Cmd]
    } else {
        &[ShellDialect::Bash, ShellDialect::Sh]
    };
    for dialect in preference {
        if let Some(invocation) = available.get(dialect) {
            return Ok((*dialect, invocation.clone()));
        }
    }
    match available.iter().next() {
        Some((dialect, invocation)) => Ok((*dialect, invocation.clone())),
        None => Err(AgentErr::DialectUnavailable {
            dialect: ShellDialect::Auto,
        }),
    }
}

/// Full argv for running `command` under a resolved dialect.
pub fn invocation_argv(invocation: &[String], command: &str) -> Vec<String> {
    let mut full = invocation.to_vec();
    full.push(command.to_string());
    full
}
