//! Host command execution
//!
//! Runs the external FreeBSD tools (bsdinstall, pfctl, service, pkg)
//! with inherited stdio so interactive installers keep working, plus a
//! per-command deadline and a cooperative cancel token.
//!
//! The [`CommandRunner`] trait is the seam test doubles plug into; the
//! rest of the crate never spawns processes directly.

use crate::error::{Error, Result};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag checked between commands and while one runs
pub type CancelToken = Arc<AtomicBool>;

/// Create a fresh, unset cancel token
pub fn cancel_token() -> CancelToken {
    Arc::new(AtomicBool::new(false))
}

/// Runs host commands to completion
pub trait CommandRunner {
    /// Run a command, waiting at most `timeout` for it to finish
    fn run(&self, command: &str, args: &[&str], timeout: Duration, cancel: &CancelToken)
        -> Result<()>;
}

/// Command runner backed by real host processes
#[derive(Debug, Default)]
pub struct HostRunner {
    verbose: bool,
}

impl HostRunner {
    /// Create a new host runner
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable verbose output
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl CommandRunner for HostRunner {
    fn run(
        &self,
        command: &str,
        args: &[&str],
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<()> {
        if self.verbose {
            println!("  Running: {} {}", command, args.join(" "));
        }

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::CommandFailed {
                command: command.to_string(),
                message: format!("Failed to start: {}", e),
            })?;

        let started = Instant::now();

        loop {
            if cancel.load(Ordering::SeqCst) {
                let _ = child.kill();
                // Wait for process to be reaped after kill
                let _ = child.wait();
                return Err(Error::Cancelled);
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    if status.success() {
                        return Ok(());
                    }
                    let message = match status.code() {
                        Some(code) => format!("exit status {}", code),
                        None => "terminated by signal".to_string(),
                    };
                    return Err(Error::CommandFailed {
                        command: command.to_string(),
                        message,
                    });
                }
                Ok(None) => {
                    if started.elapsed() > timeout {
                        let _ = child.kill();
                        // Wait for process to be reaped after kill
                        let _ = child.wait();
                        return Err(Error::CommandTimeout {
                            command: command.to_string(),
                            secs: timeout.as_secs(),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    return Err(Error::CommandFailed {
                        command: command.to_string(),
                        message: format!("Failed to wait on process: {}", e),
                    });
                }
            }
        }
    }
}
