//! SSH transport
//!
//! Connection setup and authentication are shared between the two
//! capabilities: one-shot command execution (a fresh connection per
//! command) and the persistent interactive channel that carries the remote
//! runner.

mod channel;
mod connect;
mod exec;

pub use channel::SshRemote;
