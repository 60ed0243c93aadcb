//! External command execution

use std::{io::ErrorKind, process::Stdio, time::Duration};

use tokio::process::Command;
use trait_variant::make;
use tracing::debug;

use crate::core::error::{WifiError, WifiResult};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured result of running an external program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` if terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }

    /// stderr if non-empty, stdout otherwise
    pub fn message(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Runs external programs on behalf of a backend
#[make(Send)]
pub trait CommandRunner: Sync + 'static {
    /// Run `program` with `args`
    ///
    /// Arguments at the `secrets` indices are never logged or recorded.
    async fn run(
        &self,
        program: &str,
        args: &[String],
        secrets: &[usize],
    ) -> WifiResult<CommandOutput>;
}

/// Render a command line for logs and errors, hiding the `secrets` arguments
pub fn display_command(program: &str, args: &[String], secrets: &[usize]) -> String {
    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().enumerate().map(|(i, arg)| {
        if secrets.contains(&i) {
            "***".to_string()
        } else {
            arg.clone()
        }
    }));
    parts.join(" ")
}

/// Run a command without secrets, turning a non-zero exit into
/// [`WifiError::CommandFailed`]
pub async fn run_checked<R: CommandRunner>(
    runner: &R,
    program: &str,
    args: &[String],
) -> WifiResult<CommandOutput> {
    let output = runner.run(program, args, &[]).await?;
    if output.is_success() {
        Ok(output)
    } else {
        Err(WifiError::CommandFailed {
            command: display_command(program, args, &[]),
            message: match output.status {
                Some(code) => format!("exit status {}: {}", code, output.message()),
                None => format!("terminated by signal: {}", output.message()),
            },
        })
    }
}

/// Build an owned argument vector from string slices
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Runs commands with `tokio::process`
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
    verbose: bool,
}

impl SystemRunner {
    pub fn new(verbose: bool) -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            verbose,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(false)
    }
}

impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        secrets: &[usize],
    ) -> WifiResult<CommandOutput> {
        let command_line = display_command(program, args, secrets);
        if self.verbose {
            debug!("Running: {}", command_line);
        }

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    WifiError::BackendUnavailable(format!("{} is not installed", program))
                }
                _ => WifiError::CommandFailed {
                    command: command_line.clone(),
                    message: e.to_string(),
                },
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| WifiError::CommandFailed {
                command: command_line.clone(),
                message: format!("timed out after {:?}", self.timeout),
            })??;

        let output = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        if self.verbose {
            debug!(
                status = ?output.status,
                stdout = %output.stdout.trim_end(),
                stderr = %output.stderr.trim_end(),
                "Finished: {}",
                command_line
            );
        }

        Ok(output)
    }
}

#[cfg(test)]
pub use scripted::ScriptedRunner;
