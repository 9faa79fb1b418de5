//! Running external command line tools.
//!
//! Everything this crate does to the outside world goes through a [`CommandRunner`]: the cloud
//! CLIs, `ssh`/`scp` to the client machines and YCSB itself. A runner owns a [`Spawn`]
//! implementation that makes a single attempt, and layers retry and logging on top of it.
//!
//! ## Configuration Format
//!
//! ```toml
//! [retry]
//! max_attempts = 5      # attempts for a retryable command, including the first one
//! base_delay_ms = 1000  # delay before the second attempt, doubled after each failure
//! max_delay_ms = 30000  # ceiling of a single delay
//! ```

use crate::error::{Error, Result};
use log::{debug, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

/// What a finished process left behind.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandOutput {
    pub argv: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

const CONFLICT_MARKERS: [&str; 2] = ["already exists", "ALREADY_EXISTS"];

const NOT_FOUND_MARKERS: [&str; 4] = ["NOT_FOUND", "not found", "does not exist", "No such"];

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// The tool refused because the target is already there.
    pub fn reports_conflict(&self) -> bool {
        CONFLICT_MARKERS.iter().any(|m| self.stderr.contains(m))
    }

    /// The tool refused because the target is not there.
    pub fn reports_not_found(&self) -> bool {
        NOT_FOUND_MARKERS.iter().any(|m| self.stderr.contains(m))
    }

    fn into_error(self) -> Error {
        Error::CommandFailed {
            argv: self.argv,
            stdout: self.stdout,
            stderr: self.stderr,
            exit_code: self.exit_code,
        }
    }
}

impl Error {
    /// A failed command whose tool said the target already exists.
    pub fn is_conflict(&self) -> bool {
        self.stderr()
            .is_some_and(|s| CONFLICT_MARKERS.iter().any(|m| s.contains(m)))
    }

    /// A failed command whose tool said the target does not exist.
    pub fn is_not_found(&self) -> bool {
        self.stderr()
            .is_some_and(|s| NOT_FOUND_MARKERS.iter().any(|m| s.contains(m)))
    }
}

/// A single attempt at running a program.
pub trait Spawn: Send + Sync {
    /// Run `argv[0]` with the rest as arguments and wait for it. Only a failure to start the
    /// process is an `Err`; a non-zero exit is reported through [`CommandOutput::exit_code`].
    fn spawn(&self, argv: &[String]) -> std::io::Result<CommandOutput>;
}

/// Spawns real processes with [`std::process::Command`].
#[derive(Clone, Debug, Default)]
pub struct SystemSpawn;

impl Spawn for SystemSpawn {
    fn spawn(&self, argv: &[String]) -> std::io::Result<CommandOutput> {
        let output = Command::new(&argv[0]).args(&argv[1..]).output()?;
        Ok(CommandOutput {
            argv: argv.to_vec(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            // killed by a signal
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

/// Bounds of the retry loop of a retryable command.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RetryOpt {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryOpt {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryOpt {
    /// Delay after the `attempt`-th failure (0-based), with jitter in its upper half.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(1u64 << attempt.min(32))
            .min(self.max_delay_ms);
        let ms = if exp > 1 {
            rand::rng().random_range(exp / 2..=exp)
        } else {
            exp
        };
        Duration::from_millis(ms)
    }
}

/// Per-call options of [`CommandRunner::issue`].
#[derive(Clone, Copy, Debug, Default)]
pub struct IssueOpt {
    pub retryable: bool,
    pub suppress_warning: bool,
}

impl IssueOpt {
    pub fn retryable() -> Self {
        Self {
            retryable: true,
            suppress_warning: false,
        }
    }

    pub fn quiet() -> Self {
        Self {
            retryable: false,
            suppress_warning: true,
        }
    }
}

/// Issues external commands with optional retry.
#[derive(Clone)]
pub struct CommandRunner {
    spawn: Arc<dyn Spawn>,
    retry: RetryOpt,
}

impl CommandRunner {
    pub fn new(spawn: Arc<dyn Spawn>, retry: RetryOpt) -> Self {
        Self { spawn, retry }
    }

    pub fn system(retry: RetryOpt) -> Self {
        Self::new(Arc::new(SystemSpawn), retry)
    }

    /// Run a command until it succeeds or its attempts run out.
    ///
    /// A non-retryable command gets exactly one attempt. Failures that report a permanent
    /// condition (conflict, not found) end the loop early.
    pub fn issue<S: AsRef<str>>(&self, argv: &[S], opt: IssueOpt) -> Result<CommandOutput> {
        let argv: Vec<String> = argv.iter().map(|s| s.as_ref().to_string()).collect();
        if argv.is_empty() {
            return Err(Error::Configuration("cannot issue an empty command".to_string()));
        }
        let attempts = if opt.retryable {
            self.retry.max_attempts.max(1)
        } else {
            1
        };
        let mut attempt = 0;
        loop {
            debug!("Running: {}", argv.join(" "));
            let output = self.spawn.spawn(&argv).map_err(|source| Error::Spawn {
                program: argv[0].clone(),
                source,
            })?;
            if output.success() {
                return Ok(output);
            }
            attempt += 1;
            let permanent = output.reports_conflict() || output.reports_not_found();
            if attempt >= attempts || permanent {
                if opt.suppress_warning {
                    debug!(
                        "Command `{}` exited with {}: {}",
                        argv.join(" "),
                        output.exit_code,
                        output.stderr.trim()
                    );
                } else {
                    warn!(
                        "Command `{}` exited with {}\nstdout: {}\nstderr: {}",
                        argv.join(" "),
                        output.exit_code,
                        output.stdout.trim(),
                        output.stderr.trim()
                    );
                }
                return Err(output.into_error());
            }
            let delay = self.retry.backoff(attempt - 1);
            warn!(
                "Command `{}` failed (attempt {}/{}), retrying in {:?}: {}",
                argv.join(" "),
                attempt,
                attempts,
                delay,
                output.stderr.trim()
            );
            std::thread::sleep(delay);
        }
    }
}

/// Quote a word for a POSIX shell on the other end of `ssh`.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
