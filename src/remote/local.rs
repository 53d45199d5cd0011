use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{collect_output, ChannelError, CommandOutput, RemoteChannel, RunOptions};

/// Runs commands with `sh -c` on the local machine.
#[derive(Debug, Clone, Default)]
pub struct LocalChannel;

impl LocalChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteChannel for LocalChannel {
    fn target(&self) -> &str {
        "localhost"
    }

    async fn run(&self, command: &str, options: &RunOptions) -> Result<CommandOutput, ChannelError> {
        debug!("[localhost] $ {}", command);

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).kill_on_drop(true);

        let output = match options.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| ChannelError::Timeout(limit))??,
            None => cmd.output().await?,
        };

        Ok(collect_output(output))
    }
}
