//! Session orchestration
//!
//! The orchestrator owns one sync engine, one file watcher, and one remote
//! channel for the lifetime of a session, and sequences them: initial sync
//! and watcher start run concurrently; both must complete before the one
//! initial install; the install must complete before the persistent channel
//! connects and the start command goes out.
//!
//! # Exclusion model
//!
//! `sync` and `install` each have an [`OperationGuard`]; at most one
//! operation of a kind is ever in flight. A request that finds its guard
//! held is dropped (with a notification), never queued. Operations of
//! *different* kinds may overlap. The guards are atomic check-and-set, so
//! the invariant does not depend on single-threaded execution.
//!
//! # Failure contract
//!
//! Every fatal error funnels through one abort path: emit an `error`
//! notification, then run `close()`. Closing never fails and swallows
//! subcomponent close errors. A failed post-initial resync is reported and
//! left non-fatal; the next change triggers a fresh pass. A persistent
//! channel close observed while running is always fatal: the remote runner
//! is gone.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use tether_core::config::SessionConfig;
use tether_core::error::{ChannelError, CommandError, ConnectionError, TetherError};
use tether_core::event::{ChannelEvent, EventBus, InstallPhase, SessionEvent};
use tether_core::sink::{NullSink, OutputSink};
use tether_core::state::{ChangeKind, SessionState};
use tether_core::traits::{ChangeWatcher, CodeSync, Remote};

use crate::guard::{OperationGuard, OperationKind};
use crate::ssh::SshRemote;
use crate::sync::SyncEngine;
use crate::watch::FileWatcher;

/// Input line asking the remote runner to restart its child process
const RESTART_TOKEN: &str = "rs";

/// Outcome of a guarded operation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation ran
    Completed,
    /// The guard was held; the request was dropped
    Skipped,
}

/// Drives one remote-development session.
///
/// Generic over the component seams so the lifecycle logic can be
/// exercised with in-memory doubles; [`Session`] is the production alias.
pub struct Orchestrator<S, W, R> {
    config: Arc<SessionConfig>,
    events: EventBus,
    sync: S,
    watcher: W,
    remote: R,
    sync_guard: OperationGuard,
    install_guard: OperationGuard,
    state: Mutex<SessionState>,
    stdout: Arc<dyn OutputSink>,
    stderr: Arc<dyn OutputSink>,
    quiet: Arc<dyn OutputSink>,
}

/// The production session type
pub type Session = Orchestrator<SyncEngine, FileWatcher, SshRemote>;

impl Session {
    /// Build a session from a resolved configuration.
    ///
    /// `stdout` / `stderr` receive transfer-tool and install output when
    /// the session is verbose; `live` receives the remote runner's output
    /// unconditionally.
    pub fn from_config(
        config: SessionConfig,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
        live: Arc<dyn OutputSink>,
    ) -> Arc<Self> {
        let config = Arc::new(config);
        let sync = SyncEngine::new(&config)
            .with_stdout(Arc::clone(&stdout))
            .with_stderr(Arc::clone(&stderr));
        let watcher = FileWatcher::new(&config);
        let remote = SshRemote::new(Arc::clone(&config), live);
        Arc::new(Orchestrator::new(config, sync, watcher, remote, stdout, stderr))
    }
}

impl<S, W, R> Orchestrator<S, W, R>
where
    S: CodeSync + 'static,
    W: ChangeWatcher + 'static,
    R: Remote + 'static,
{
    /// Compose a session from its parts.
    pub fn new(
        config: Arc<SessionConfig>,
        sync: S,
        watcher: W,
        remote: R,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> Self {
        Self {
            config,
            events: EventBus::new(),
            sync,
            watcher,
            remote,
            sync_guard: OperationGuard::new(OperationKind::Sync),
            install_guard: OperationGuard::new(OperationKind::Install),
            state: Mutex::new(SessionState::Created),
            stdout,
            stderr,
            quiet: Arc::new(NullSink),
        }
    }

    /// The session's configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Subscribe to persistent-channel events.
    pub fn channel_events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.remote.subscribe()
    }

    /// Begin the session.
    ///
    /// Resolves once the remote runner has been launched; any stage failure
    /// aborts the session (the error notification and `close()` happen
    /// before this returns the error).
    pub async fn start(self: &Arc<Self>) -> Result<(), TetherError> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state != SessionState::Created {
                return Err(TetherError::AlreadyStarted);
            }
            *state = SessionState::Starting;
        }
        self.events.emit(SessionEvent::Start);

        match self.run_start_stages().await {
            Ok(()) => {
                self.set_state(SessionState::Running);
                tracing::info!("session running");
                Ok(())
            }
            Err(err) => {
                self.abort(&err).await;
                Err(err)
            }
        }
    }

    async fn run_start_stages(self: &Arc<Self>) -> Result<(), TetherError> {
        let (sync_result, watch_result) = tokio::join!(self.sync_code(), self.watch());
        sync_result?;
        watch_result?;

        self.install().await?;

        let channel_events = self.remote.subscribe();
        self.remote.connect().await?;
        self.spawn_channel_monitor(channel_events);

        self.events.emit(SessionEvent::RunnerStart);
        let launch = format!("cd {} && {}", self.config.target, self.config.start);
        self.remote.send(&launch).await?;
        Ok(())
    }

    /// Request one synchronization pass.
    ///
    /// A request observed while a pass is in flight is dropped and reported
    /// as skipped.
    pub async fn sync_code(&self) -> Result<Outcome, TetherError> {
        self.events.emit(SessionEvent::Sync);
        let Some(_permit) = self.sync_guard.try_acquire() else {
            self.events.emit(SessionEvent::SyncSkipped);
            return Ok(Outcome::Skipped);
        };
        self.sync.execute().await?;
        Ok(Outcome::Completed)
    }

    /// Request one dependency-installation pass.
    ///
    /// Drop-on-busy like [`sync_code`](Self::sync_code): the trigger is
    /// always observable, but a second pass never starts. On success while
    /// the session is running, the remote runner is signalled to restart
    /// instead of being relaunched.
    pub async fn install(&self) -> Result<Outcome, TetherError> {
        self.events.emit(SessionEvent::Install(InstallPhase::Triggered));
        let Some(_permit) = self.install_guard.try_acquire() else {
            return Ok(Outcome::Skipped);
        };
        self.events.emit(SessionEvent::Install(InstallPhase::Started));

        let command = format!("cd {} && {}", self.config.target, self.config.install);
        let exit_code = self
            .execute_inner(&command, self.verbose_stdout(), self.verbose_stderr())
            .await?;
        self.events
            .emit(SessionEvent::Install(InstallPhase::Ended { exit_code }));

        if exit_code != 0 {
            return Err(CommandError { command, exit_code }.into());
        }

        if self.state() == SessionState::Running {
            // the runner already watches the remote tree; a fresh dependency
            // tree only needs a restart, not a relaunch
            if let Err(e) = self.remote.send(RESTART_TOKEN).await {
                tracing::warn!("failed to signal runner restart: {}", e);
            }
        }
        Ok(Outcome::Completed)
    }

    /// Run an arbitrary one-shot remote command, streaming output to the
    /// given sinks, and resolve with its exit status.
    pub async fn execute(
        &self,
        command: &str,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> Result<u32, TetherError> {
        self.execute_inner(command, stdout, stderr)
            .await
            .map_err(Into::into)
    }

    async fn execute_inner(
        &self,
        command: &str,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> Result<u32, ConnectionError> {
        self.events.emit(SessionEvent::Exec {
            command: command.to_string(),
        });
        self.remote.exec(command, stdout, stderr).await
    }

    /// Start the file watcher and route its notifications.
    pub async fn watch(self: &Arc<Self>) -> Result<(), TetherError> {
        let mut changes = self.watcher.start().await?;
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(kind) = changes.recv().await {
                session.handle_change(kind).await;
            }
            tracing::debug!("change stream ended");
        });
        Ok(())
    }

    async fn handle_change(self: &Arc<Self>, kind: ChangeKind) {
        match kind {
            ChangeKind::Sync => {
                if let Err(err) = self.sync_code().await {
                    // post-initial resync failures are reported, never
                    // fatal; the next change triggers a fresh pass
                    tracing::warn!("resync failed: {}", err);
                    self.events.emit(SessionEvent::SyncFailed {
                        message: err.to_string(),
                    });
                }
            }
            ChangeKind::Install => match self.install().await {
                Ok(_) => {}
                Err(TetherError::Command(err)) => {
                    // already observable through the install:ended exit code
                    tracing::warn!("triggered install failed: {}", err);
                }
                Err(err) => self.abort(&err).await,
            },
        }
    }

    fn spawn_channel_monitor(self: &Arc<Self>, mut events: broadcast::Receiver<ChannelEvent>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(ChannelEvent::Closed) => {
                        // a closed live channel means the remote runner is
                        // gone; fatal unless we are the ones closing
                        if session.state() == SessionState::Running {
                            session.abort(&ChannelError::Closed.into()).await;
                        }
                        break;
                    }
                    Ok(ChannelEvent::Error { message }) => {
                        if !session.state().is_terminal() {
                            session
                                .abort(&ConnectionError::Transport(message).into())
                                .await;
                        }
                        break;
                    }
                    Ok(ChannelEvent::Connected) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("channel monitor lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Shut the session down.
    ///
    /// Closes the watcher and the channel concurrently and resolves when
    /// both report closed. In-flight sync or install passes are not
    /// interrupted. Never fails; safe to call from any state, any number
    /// of times; the `close` notification fires exactly once.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if state.is_terminal() {
                return;
            }
            *state = SessionState::Closing;
        }
        self.events.emit(SessionEvent::Close);

        // subcomponent close failures are logged inside the components and
        // swallowed; shutdown always completes
        tokio::join!(self.watcher.close(), self.remote.close());

        self.set_state(SessionState::Closed);
        tracing::info!("session closed");
    }

    /// The single fatal-error path: emit `error`, then close.
    async fn abort(&self, err: &TetherError) {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if matches!(
                *state,
                SessionState::Closing | SessionState::Closed | SessionState::Aborted
            ) {
                return;
            }
            *state = SessionState::Aborted;
        }
        tracing::error!("session aborted: {}", err);
        self.events.emit(SessionEvent::Error {
            message: err.to_string(),
        });
        self.close().await;
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().expect("state lock poisoned");
        tracing::debug!(from = %*state, to = %next, "session state");
        *state = next;
    }

    fn verbose_stdout(&self) -> Arc<dyn OutputSink> {
        if self.config.verbose {
            Arc::clone(&self.stdout)
        } else {
            Arc::clone(&self.quiet)
        }
    }

    fn verbose_stderr(&self) -> Arc<dyn OutputSink> {
        if self.config.verbose {
            Arc::clone(&self.stderr)
        } else {
            Arc::clone(&self.quiet)
        }
    }
}
