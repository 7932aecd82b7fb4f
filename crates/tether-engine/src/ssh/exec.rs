//! One-shot remote command execution
//!
//! Each command gets its own connection, torn down when the command
//! finishes. The remote exit status is returned as data: a non-zero exit
//! is the caller's to interpret.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;

use tether_core::config::SessionConfig;
use tether_core::error::ConnectionError;
use tether_core::sink::OutputSink;

use super::connect;

/// Extended-data stream id carrying stderr
const STDERR_EXT: u32 = 1;

/// Minimal client handler for one-shot executions; output is consumed
/// through the channel itself.
struct ExecHandler;

#[async_trait]
impl client::Handler for ExecHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        // no known-hosts store; host trust is the operator's key setup
        Ok(true)
    }
}

/// Connect, run `command`, stream its output to the sinks, and resolve
/// with the remote exit status.
pub(crate) async fn run(
    config: &SessionConfig,
    command: &str,
    stdout: Arc<dyn OutputSink>,
    stderr: Arc<dyn OutputSink>,
) -> Result<u32, ConnectionError> {
    let session = connect::open(config, ExecHandler).await?;
    let mut channel = session
        .channel_open_session()
        .await
        .map_err(transport)?;
    channel.exec(true, command).await.map_err(transport)?;
    tracing::debug!(%command, "remote command running");

    let mut exit_code = 0;
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => stdout.write(data),
            ChannelMsg::ExtendedData { ref data, ext: STDERR_EXT } => stderr.write(data),
            ChannelMsg::ExitStatus { exit_status } => exit_code = exit_status,
            _ => {}
        }
    }

    if let Err(e) = session
        .disconnect(Disconnect::ByApplication, "command finished", "en")
        .await
    {
        tracing::debug!("disconnect after command failed: {}", e);
    }

    tracing::debug!(%command, exit_code, "remote command finished");
    Ok(exit_code)
}

fn transport(e: russh::Error) -> ConnectionError {
    ConnectionError::Transport(e.to_string())
}
