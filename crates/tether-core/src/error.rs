//! Error taxonomy for the tether ecosystem
//!
//! Fatality is decided by the orchestrator, not encoded here: a
//! [`SyncError`] aborts the session during the initial sync but is only
//! reported for later resyncs, and a [`CommandError`] is never fatal on its
//! own.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the tether ecosystem
#[derive(Error, Debug)]
pub enum TetherError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Transport or authentication error
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    /// Transfer tool error
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Remote command failure
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    /// Persistent channel error
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// File watcher error
    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    /// `start()` was called on a session that already started
    #[error("Session already started")]
    AlreadyStarted,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors; fatal at construction, the session never
/// starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No key file, password, or agent socket could be resolved
    #[error("no ssh authentication method provided")]
    NoAuthMethod,

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Transport-level errors; always fatal to the session.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Connection attempt exceeded the ready timeout
    #[error("Connection to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    /// The remote host rejected the credentials
    #[error("Authentication failed for user '{username}'")]
    AuthenticationFailed { username: String },

    /// The private key could not be loaded
    #[error("Failed to load key {path}: {detail}")]
    KeyFile { path: PathBuf, detail: String },

    /// The SSH agent could not be reached or offered no usable identity
    #[error("SSH agent error at {socket}: {detail}")]
    Agent { socket: PathBuf, detail: String },

    /// Network setup failed
    #[error("Connection to {address} failed: {detail}")]
    Refused { address: String, detail: String },

    /// Error on an established transport
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Transfer tool errors.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The tool binary could not be started
    #[error("Failed to spawn transfer tool '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The tool exited with a non-zero code; `detail` carries its diagnostic
    /// output
    #[error("Transfer tool exited with code {code}: {detail}")]
    Failed { code: i32, detail: String },

    /// The tool was terminated by a signal
    #[error("Transfer tool terminated by signal")]
    Interrupted,

    /// Reading the tool's output or waiting on it failed
    #[error("Transfer tool I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A remote one-shot command exited non-zero. Reported with its captured
/// output; callers decide whether that is fatal.
#[derive(Error, Debug)]
#[error("Remote command '{command}' exited with code {exit_code}")]
pub struct CommandError {
    /// The full command string sent to the remote shell
    pub command: String,
    /// The remote exit status
    pub exit_code: u32,
}

/// Persistent channel errors.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// `send` was called outside the connected state
    #[error("Channel is not connected")]
    NotConnected,

    /// The channel dropped; once running this ends the session
    #[error("Persistent channel closed")]
    Closed,

    /// A write on the channel failed
    #[error("Failed to send on channel: {0}")]
    Send(String),
}

/// File watcher errors.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The OS watch could not be established
    #[error("Failed to watch {path}: {detail}")]
    Init { path: PathBuf, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_display() {
        let err = CommandError {
            command: "cd ~/remote-sync && yarn".into(),
            exit_code: 127,
        };
        assert_eq!(
            err.to_string(),
            "Remote command 'cd ~/remote-sync && yarn' exited with code 127"
        );
    }

    #[test]
    fn test_errors_unify_under_top_level() {
        let err: TetherError = ConfigError::NoAuthMethod.into();
        assert!(matches!(err, TetherError::Config(_)));

        let err: TetherError = ChannelError::Closed.into();
        assert_eq!(
            err.to_string(),
            "Channel error: Persistent channel closed"
        );
    }
}
