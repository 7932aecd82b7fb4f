//! Synchronization trait

use async_trait::async_trait;

use crate::error::SyncError;

/// Abstraction over one-shot directory mirroring.
///
/// Implementations execute unconditionally when called; exclusion between
/// overlapping passes is the caller's responsibility.
#[async_trait]
pub trait CodeSync: Send + Sync {
    /// Run one full mirroring pass from the local source directory to the
    /// remote target directory.
    ///
    /// Resolves with the transfer tool's result code on success; a non-zero
    /// tool exit resolves as an error carrying the tool's diagnostic output.
    async fn execute(&self) -> Result<i32, SyncError>;
}
