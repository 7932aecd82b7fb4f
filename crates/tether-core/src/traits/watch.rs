//! Change watcher trait

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::WatchError;
use crate::state::ChangeKind;

/// Abstraction over recursive local source-tree observation.
#[async_trait]
pub trait ChangeWatcher: Send + Sync {
    /// Begin observation and return the stream of classified, coalesced
    /// change notifications. The stream ends when the watcher is closed.
    async fn start(&self) -> Result<mpsc::Receiver<ChangeKind>, WatchError>;

    /// Stop observation and release the underlying OS watch handles.
    /// Idempotent; never fails.
    async fn close(&self);
}
