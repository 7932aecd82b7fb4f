//! Remote channel trait

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::error::{ChannelError, ConnectionError};
use crate::event::ChannelEvent;
use crate::sink::OutputSink;
use crate::state::ChannelState;

/// Abstraction over the remote host: one-shot command execution plus a
/// single persistent interactive channel.
///
/// Both capabilities share the connection parameters and the resolved
/// authentication method fixed at construction.
#[async_trait]
pub trait Remote: Send + Sync {
    /// Current state of the persistent channel.
    fn state(&self) -> ChannelState;

    /// Subscribe to persistent-channel lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent>;

    /// Run `command` remotely, streaming stdout/stderr to the given sinks,
    /// and resolve with its exit status.
    ///
    /// A non-zero exit is not an error here; callers interpret the status.
    /// Fails only when the connection or authentication fails.
    async fn exec(
        &self,
        command: &str,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> Result<u32, ConnectionError>;

    /// Establish the persistent interactive channel.
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Write one line of input to the persistent channel. Valid only while
    /// connected.
    async fn send(&self, line: &str) -> Result<(), ChannelError>;

    /// Tear the persistent channel down. Idempotent; never fails.
    async fn close(&self);
}
