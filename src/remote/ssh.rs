use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{collect_output, ChannelError, CommandOutput, RemoteChannel, RunOptions};
use crate::retry::{retry_async, RetryPolicy};

/// Exit status the OpenSSH client reserves for its own failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Remote no-op used to establish a connection before a command that must not
/// be repeated.
const CONNECTIVITY_CHECK: &str = "true";

/// SSH target configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Host name or address
    pub host: String,
    /// Login user (defaults to the ssh client's own default)
    pub user: Option<String>,
    /// SSH port
    pub port: u16,
    /// Private key file
    pub identity_file: Option<PathBuf>,
    /// Seconds to wait for the TCP/SSH handshake
    pub connect_timeout_secs: u64,
    /// Extra `-o Key=Value` options
    pub options: Vec<String>,
    /// Reconnect schedule for connection failures
    pub retry: RetryPolicy,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            user: None,
            port: 22,
            identity_file: None,
            connect_timeout_secs: 10,
            options: Vec::new(),
            retry: RetryPolicy::ssh_default(),
        }
    }
}

impl SshConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// `user@host`, or just `host` when no user is configured.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// Arguments for the `ssh` client, ending with the remote command.
    pub fn build_args(&self, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        for opt in &self.options {
            args.push("-o".to_string());
            args.push(opt.clone());
        }
        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }
        if let Some(key) = &self.identity_file {
            args.push("-i".to_string());
            args.push(key.to_string_lossy().to_string());
        }
        args.push(self.destination());
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

/// Runs commands on a remote host through the system `ssh` client.
pub struct SshChannel {
    config: SshConfig,
    target: String,
}

impl SshChannel {
    pub fn new(config: SshConfig) -> Self {
        let target = config.destination();
        Self { config, target }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    async fn run_once(&self, command: &str, options: &RunOptions) -> Result<CommandOutput, ChannelError> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.config.build_args(command)).kill_on_drop(true);

        let output = match options.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| ChannelError::Timeout(limit))??,
            None => cmd.output().await?,
        };
        let output = collect_output(output);

        if output.exit_code == SSH_CONNECTION_FAILURE {
            return Err(ChannelError::Connection {
                host: self.target.clone(),
                message: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

#[async_trait]
impl RemoteChannel for SshChannel {
    fn target(&self) -> &str {
        &self.target
    }

    async fn run(&self, command: &str, options: &RunOptions) -> Result<CommandOutput, ChannelError> {
        debug!("[{}] $ {}", self.target, command);
        let label = format!("ssh {}", self.target);
        send_with_retry(&self.config.retry, &label, command, options, |cmd| {
            self.run_once(cmd, options)
        })
        .await
    }
}

/// Send `command` through `send`, retrying connection failures per `policy`.
///
/// A command marked `at_most_once` is never repeated: the retries go to a
/// no-op connectivity check, then the command is sent a single time. A
/// session dropped after that surfaces as a connection error.
async fn send_with_retry<'a, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    command: &'a str,
    options: &RunOptions,
    send: F,
) -> Result<CommandOutput, ChannelError>
where
    F: Fn(&'a str) -> Fut,
    Fut: Future<Output = Result<CommandOutput, ChannelError>>,
{
    if !options.at_most_once {
        return retry_async(policy, label, || send(command), ChannelError::is_connection).await;
    }

    let check = retry_async(
        policy,
        label,
        || send(CONNECTIVITY_CHECK),
        ChannelError::is_connection,
    )
    .await?;
    if !check.success() {
        warn!(
            "{}: connectivity check exited {}: {}",
            label,
            check.exit_code,
            check.stderr.trim()
        );
    }
    send(command).await
}
