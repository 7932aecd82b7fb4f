//! Local source-tree observation
//!
//! A recursive OS watcher feeds raw filesystem events over a bridge channel
//! into a debounce task, which classifies paths (dependency manifest vs
//! everything else, minus ignored directories) and coalesces rapid changes
//! into one notification per kind per window.

use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use notify::{recommended_watcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tether_core::config::{SessionConfig, IGNORED_DIRS};
use tether_core::error::WatchError;
use tether_core::state::ChangeKind;
use tether_core::traits::ChangeWatcher;

/// Trailing-edge window within which raw events coalesce into a single
/// notification per kind.
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(300);

/// Capacity of the bridge from the OS watcher thread. Raw events past a
/// full bridge are dropped; the pending flags already cover them.
const RAW_EVENT_CAPACITY: usize = 256;

/// Capacity of the outgoing, coalesced notification channel
const NOTIFY_CAPACITY: usize = 16;

/// Watches the local source tree and emits classified change
/// notifications.
pub struct FileWatcher {
    source: PathBuf,
    manifest: String,
    handle: Mutex<Option<RecommendedWatcher>>,
    cancel: CancellationToken,
}

impl FileWatcher {
    /// Create a watcher for the session's source directory.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            source: config.source.clone(),
            manifest: config.manifest.clone(),
            handle: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }
}

/// Classify one changed path.
///
/// Paths inside ignored directories yield `None`; a file named like the
/// dependency manifest yields [`ChangeKind::Install`]; everything else
/// yields [`ChangeKind::Sync`].
pub fn classify(path: &Path, manifest: &str) -> Option<ChangeKind> {
    for component in path.components() {
        if let Component::Normal(name) = component {
            if IGNORED_DIRS
                .iter()
                .any(|dir| name == std::ffi::OsStr::new(dir))
            {
                return None;
            }
        }
    }
    let name = path.file_name()?.to_str()?;
    if name == manifest {
        Some(ChangeKind::Install)
    } else {
        Some(ChangeKind::Sync)
    }
}

#[async_trait]
impl ChangeWatcher for FileWatcher {
    async fn start(&self) -> Result<mpsc::Receiver<ChangeKind>, WatchError> {
        let (raw_tx, mut raw_rx) = mpsc::channel::<Vec<PathBuf>>(RAW_EVENT_CAPACITY);

        let mut watcher = recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, notify::EventKind::Access(_)) {
                        return;
                    }
                    // a full bridge means a notification is already pending
                    let _ = raw_tx.try_send(event.paths);
                }
                Err(e) => tracing::warn!("watch error: {}", e),
            }
        })
        .map_err(|e| WatchError::Init {
            path: self.source.clone(),
            detail: e.to_string(),
        })?;

        watcher
            .watch(&self.source, RecursiveMode::Recursive)
            .map_err(|e| WatchError::Init {
                path: self.source.clone(),
                detail: e.to_string(),
            })?;
        tracing::info!(path = %self.source.display(), "watching for changes");

        *self.handle.lock().expect("watch handle lock poisoned") = Some(watcher);

        let (out_tx, out_rx) = mpsc::channel(NOTIFY_CAPACITY);
        let manifest = self.manifest.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut pending_sync = false;
            let mut pending_install = false;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    raw = raw_rx.recv() => match raw {
                        Some(paths) => {
                            for path in paths {
                                match classify(&path, &manifest) {
                                    Some(ChangeKind::Install) => pending_install = true,
                                    Some(ChangeKind::Sync) => pending_sync = true,
                                    None => {}
                                }
                            }
                        }
                        None => break,
                    },
                    _ = tokio::time::sleep(DEBOUNCE_WINDOW), if pending_sync || pending_install => {
                        if pending_install {
                            pending_install = false;
                            if out_tx.send(ChangeKind::Install).await.is_err() {
                                break;
                            }
                        }
                        if pending_sync {
                            pending_sync = false;
                            if out_tx.send(ChangeKind::Sync).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
            tracing::debug!("change coalescing task exiting");
        });

        Ok(out_rx)
    }

    async fn close(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().expect("watch handle lock poisoned").take();
        if handle.is_some() {
            tracing::debug!(path = %self.source.display(), "watch handles released");
        }
        drop(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_change_classified_as_install() {
        assert_eq!(
            classify(Path::new("/project/package.json"), "package.json"),
            Some(ChangeKind::Install)
        );
        assert_eq!(
            classify(Path::new("/project/sub/package.json"), "package.json"),
            Some(ChangeKind::Install)
        );
    }

    #[test]
    fn test_other_change_classified_as_sync() {
        assert_eq!(
            classify(Path::new("/project/src/index.js"), "package.json"),
            Some(ChangeKind::Sync)
        );
        // a file merely named like a manifest elsewhere still installs; the
        // name, not the location, is the pattern
        assert_eq!(
            classify(Path::new("/project/Cargo.toml"), "Cargo.toml"),
            Some(ChangeKind::Install)
        );
    }

    #[test]
    fn test_ignored_directories_yield_nothing() {
        assert_eq!(
            classify(Path::new("/project/node_modules/left-pad/index.js"), "package.json"),
            None
        );
        assert_eq!(
            classify(Path::new("/project/.git/HEAD"), "package.json"),
            None
        );
        // a manifest inside an ignored tree stays ignored
        assert_eq!(
            classify(
                Path::new("/project/node_modules/left-pad/package.json"),
                "package.json"
            ),
            None
        );
    }

    #[test]
    fn test_directory_path_without_file_name() {
        assert_eq!(classify(Path::new("/"), "package.json"), None);
    }
}
