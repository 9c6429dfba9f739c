//! The seam between command producers and a worker's control channel.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RconError;

/// Something that can deliver control commands to one worker.
///
/// [`RconClient`](crate::RconClient) is the production implementation;
/// dispatchers and executors only depend on this trait so they can be
/// driven against in-memory fakes.
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// Deliver one command and return the textual reply.
    async fn send_command(&self, command: &str) -> Result<String, RconError>;

    /// Deliver several commands in order, pausing `spacing` between them.
    ///
    /// Stops at the first failure.
    async fn send_batch(
        &self,
        commands: &[String],
        spacing: Duration,
    ) -> Result<Vec<String>, RconError> {
        let mut replies = Vec::with_capacity(commands.len());
        for (i, command) in commands.iter().enumerate() {
            if i > 0 && !spacing.is_zero() {
                tokio::time::sleep(spacing).await;
            }
            replies.push(self.send_command(command).await?);
        }
        Ok(replies)
    }
}
