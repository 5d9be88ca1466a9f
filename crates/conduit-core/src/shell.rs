//! Login-shell command construction for the peer process.
//!
//! Agent binaries are usually installed through version managers that only
//! extend `PATH` inside a login shell, so the peer is launched as
//! `<shell> -l -c '<quoted binary and args>'` on Unix.

use std::fmt;
use std::path::Path;
use std::process::Command;

use serde::Serialize;

use crate::error::BridgeError;

/// How the peer process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerExit {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl fmt::Display for PeerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "agent process exited with code {}", code),
            (None, Some(signal)) => write!(f, "agent process killed by signal {}", signal),
            (None, None) => write!(f, "agent process exited"),
        }
    }
}

/// Shells that do not understand `-l -c`.
#[cfg(unix)]
const NON_POSIX_SHELLS: [&str; 6] = ["fish", "nu", "nushell", "elvish", "xonsh", "ion"];

/// Prepend the binary's directory to `PATH` so sibling tools (node, etc.) resolve.
fn prepend_binary_dir(cmd: &mut Command, binary_path: &str) {
    if !binary_path.contains('/') {
        return;
    }
    let Some(dir) = Path::new(binary_path).parent().and_then(|d| d.to_str()) else {
        return;
    };
    let path = match std::env::var("PATH") {
        Ok(existing) if !existing.is_empty() => format!("{}:{}", dir, existing),
        _ => dir.to_string(),
    };
    cmd.env("PATH", path);
}

/// Build the command that launches `binary_path args...` inside a login shell.
///
/// `shell_prefix` overrides the default `$SHELL -l -c` (e.g. `/bin/zsh -l -c`).
#[cfg(unix)]
pub fn build_login_shell_command(
    binary_path: &str,
    args: &[String],
    working_dir: Option<&str>,
    shell_prefix: Option<&str>,
) -> Result<Command, BridgeError> {
    let prefix = shell_prefix_or_default(shell_prefix);
    let mut prefix_parts = prefix.split_whitespace();
    let shell_program = prefix_parts
        .next()
        .ok_or_else(|| BridgeError::Spawn("Empty shell prefix".to_string()))?;

    let quoted = std::iter::once(binary_path)
        .chain(args.iter().map(String::as_str))
        .map(|part| {
            shlex::try_quote(part)
                .map(|q| q.into_owned())
                .map_err(|_| BridgeError::Spawn(format!("Cannot quote argument: {}", part)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut cmd = Command::new(shell_program);
    cmd.args(prefix_parts).arg(quoted.join(" "));
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    prepend_binary_dir(&mut cmd, binary_path);
    Ok(cmd)
}

#[cfg(unix)]
fn shell_prefix_or_default(custom_prefix: Option<&str>) -> String {
    if let Some(prefix) = custom_prefix.filter(|p| !p.trim().is_empty()) {
        return prefix.to_string();
    }

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let shell_name = Path::new(&shell)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    if NON_POSIX_SHELLS.contains(&shell_name) {
        let fallback = if Path::new("/bin/bash").exists() {
            "/bin/bash"
        } else {
            "/bin/sh"
        };
        return format!("{} -l -c", fallback);
    }
    format!("{} -l -c", shell)
}

/// Windows has no login shell; the binary is launched directly.
#[cfg(windows)]
pub fn build_login_shell_command(
    binary_path: &str,
    args: &[String],
    working_dir: Option<&str>,
    _shell_prefix: Option<&str>,
) -> Result<Command, BridgeError> {
    let mut cmd = Command::new(binary_path);
    cmd.args(args);
    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
    }
    prepend_binary_dir(&mut cmd, binary_path);
    Ok(cmd)
}
