//! Interactive jail consoles
//!
//! Wraps jexec(8) to drop the operator into a shell inside a running
//! jail, with stdio inherited for interactive use.

use crate::error::{Error, Result};
use std::process::{Command, ExitStatus, Stdio};

/// Open an interactive shell inside a jail
///
/// Runs `jexec -u <user> <jail>` with no explicit command, so jexec
/// starts the user's login shell.
pub fn enter_jail(jail: &str, user: &str) -> Result<ExitStatus> {
    let status = Command::new("/usr/sbin/jexec")
        .arg("-u")
        .arg(user)
        .arg(jail)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| Error::CommandFailed {
            command: "jexec".to_string(),
            message: format!("Failed to execute jexec: {}", e),
        })?;

    Ok(status)
}
