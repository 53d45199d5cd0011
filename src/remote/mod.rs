//! Remote command channel.
//!
//! Everything the harness does on a target host goes through
//! [`RemoteChannel::run`]: one shell command in, `(exit code, stdout, stderr)`
//! out. Two implementations are provided, [`SshChannel`] for real hosts and
//! [`LocalChannel`] for the machine the harness runs on.

mod local;
#[cfg(test)]
pub(crate) mod mock;
mod ssh;

pub use local::LocalChannel;
pub use ssh::{SshChannel, SshConfig};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a channel itself, as opposed to a command that ran and
/// exited non-zero.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    #[error("Command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),
}

impl ChannelError {
    /// Whether reconnecting might help.
    pub fn is_connection(&self) -> bool {
        matches!(self, ChannelError::Connection { .. })
    }
}

/// Output of a command that ran to completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// Successful command with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self::new(0, stdout, "")
    }

    /// Failed command with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self::new(exit_code, "", stderr)
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Per-call options.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Kill the command if it runs longer than this
    pub timeout: Option<Duration>,
    /// Never send the command twice. Channels that reconnect may only retry
    /// before the command went out.
    pub at_most_once: bool,
}

impl RunOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }

    /// Mark the command as unsafe to repeat (launches, `docker run`).
    pub fn at_most_once(mut self) -> Self {
        self.at_most_once = true;
        self
    }
}

/// Executes shell commands on a host.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Human-readable target, used in log lines.
    fn target(&self) -> &str;

    /// Run `command` through the host's shell.
    async fn run(&self, command: &str, options: &RunOptions) -> Result<CommandOutput, ChannelError>;
}

#[async_trait]
impl<T: RemoteChannel + ?Sized> RemoteChannel for std::sync::Arc<T> {
    fn target(&self) -> &str {
        (**self).target()
    }

    async fn run(&self, command: &str, options: &RunOptions) -> Result<CommandOutput, ChannelError> {
        (**self).run(command, options).await
    }
}

/// Collect a finished `std::process::Output` into a [`CommandOutput`].
pub(crate) fn collect_output(output: std::process::Output) -> CommandOutput {
    CommandOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }
}
