//! Exclusive-execution guards
//!
//! Each mutable operation kind (sync, install) gets one guard. The check
//! and the set are a single compare-and-swap, so the invariant holds under
//! concurrent tasks on a multi-threaded runtime, not just under
//! single-threaded interleaving. A request that finds the guard held is
//! dropped by the caller, never queued.

use std::sync::atomic::{AtomicBool, Ordering};

/// Kind of guarded mutable operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Directory mirroring pass
    Sync,
    /// Dependency installation pass
    Install,
}

/// Exclusive-execution flag: at most one permit is out at any time.
pub struct OperationGuard {
    kind: OperationKind,
    busy: AtomicBool,
}

impl OperationGuard {
    /// Create a released guard for the given operation kind.
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            busy: AtomicBool::new(false),
        }
    }

    /// Attempt to claim the guard.
    ///
    /// Returns `None` when an operation of this kind is already in flight.
    /// The returned permit releases the guard when dropped.
    pub fn try_acquire(&self) -> Option<OperationPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()?;
        tracing::trace!(kind = ?self.kind, "guard acquired");
        Some(OperationPermit { guard: self })
    }

    /// Whether an operation of this kind is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// The operation kind this guard protects.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }
}

/// RAII permit for one guarded operation.
pub struct OperationPermit<'a> {
    guard: &'a OperationGuard,
}

impl Drop for OperationPermit<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
        tracing::trace!(kind = ?self.guard.kind, "guard released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn test_second_acquire_is_dropped() {
        let guard = OperationGuard::new(OperationKind::Sync);
        let permit = guard.try_acquire();
        assert!(permit.is_some());
        assert!(guard.is_busy());
        assert!(guard.try_acquire().is_none());
    }

    #[test]
    fn test_drop_releases() {
        let guard = OperationGuard::new(OperationKind::Install);
        {
            let _permit = guard.try_acquire().unwrap();
            assert!(guard.is_busy());
        }
        assert!(!guard.is_busy());
        assert!(guard.try_acquire().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_at_most_one_permit_under_concurrency() {
        let guard = Arc::new(OperationGuard::new(OperationKind::Sync));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let guard = Arc::clone(&guard);
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                if let Some(_permit) = guard.try_acquire() {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(!guard.is_busy());
    }
}
