//! Scripted channel for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ChannelError, CommandOutput, RemoteChannel, RunOptions};

type Handler = dyn Fn(&str) -> Result<CommandOutput, ChannelError> + Send + Sync;

/// Answers every command with a caller-supplied closure and records what was
/// asked.
pub(crate) struct MockChannel {
    handler: Box<Handler>,
    commands: Mutex<Vec<String>>,
    options: Mutex<Vec<RunOptions>>,
}

impl MockChannel {
    pub(crate) fn new<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Result<CommandOutput, ChannelError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            commands: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub(crate) fn options(&self) -> Vec<RunOptions> {
        self.options.lock().clone()
    }

    pub(crate) fn count_matching(&self, needle: &str) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|c| c.contains(needle))
            .count()
    }
}

#[async_trait]
impl RemoteChannel for MockChannel {
    fn target(&self) -> &str {
        "mock"
    }

    async fn run(&self, command: &str, options: &RunOptions) -> Result<CommandOutput, ChannelError> {
        self.commands.lock().push(command.to_string());
        self.options.lock().push(options.clone());
        (self.handler)(command)
    }
}
