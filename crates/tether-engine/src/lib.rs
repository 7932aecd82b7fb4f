//! tether-engine: remote-session orchestration engine
//!
//! Composes directory mirroring (an external rsync invocation), local
//! change watching, and an SSH remote channel into a single session
//! lifecycle with exclusive-execution guarantees for its mutable
//! operations. The orchestrator is generic over the component traits in
//! `tether-core`; this crate also provides the production implementations.

pub mod guard;
pub mod orchestrator;
pub mod ssh;
pub mod sync;
pub mod watch;

pub use guard::{OperationGuard, OperationKind};
pub use orchestrator::{Orchestrator, Outcome, Session};
pub use ssh::SshRemote;
pub use sync::SyncEngine;
pub use watch::FileWatcher;
