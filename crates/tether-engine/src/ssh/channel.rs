//! The persistent remote channel
//!
//! One long-lived pty + shell per session carries the remote runner: the
//! launch command and later restart tokens go out as input lines, and the
//! runner's output streams back into the live sink. Channel teardown,
//! local or remote, surfaces as a [`ChannelEvent`]; a close observed while
//! the session is running means the runner is gone.
//!
//! No reconnection is attempted: a dropped channel ends the session.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use russh::client::{self, Msg};
use russh::{Channel, ChannelId, Disconnect};
use russh_keys::key::PublicKey;
use tokio::sync::{broadcast, Mutex};

use tether_core::config::SessionConfig;
use tether_core::error::{ChannelError, ConnectionError};
use tether_core::event::ChannelEvent;
use tether_core::sink::OutputSink;
use tether_core::state::ChannelState;
use tether_core::traits::Remote;

use super::{connect, exec};

/// Capacity of the channel event bus
const CHANNEL_EVENT_CAPACITY: usize = 32;

/// Terminal dimensions requested for the remote pty
const PTY_COLS: u32 = 80;
const PTY_ROWS: u32 = 24;

/// Channel state shared between the owning [`SshRemote`] and the transport
/// handler callbacks.
struct ChannelShared {
    state: StdMutex<ChannelState>,
    events: broadcast::Sender<ChannelEvent>,
}

impl ChannelShared {
    fn state(&self) -> ChannelState {
        *self.state.lock().expect("channel state lock poisoned")
    }

    fn set_state(&self, next: ChannelState) {
        let mut state = self.state.lock().expect("channel state lock poisoned");
        tracing::debug!(from = %*state, to = %next, "channel state");
        *state = next;
    }

    /// Transition to `closed` and publish the event, exactly once.
    fn mark_closed(&self) {
        {
            let mut state = self.state.lock().expect("channel state lock poisoned");
            if matches!(*state, ChannelState::Closed | ChannelState::Errored) {
                return;
            }
            tracing::debug!(from = %*state, "channel closed");
            *state = ChannelState::Closed;
        }
        let _ = self.events.send(ChannelEvent::Closed);
    }

    /// Transition to the absorbing `errored` state and publish the event.
    fn mark_errored(&self, message: String) {
        {
            let mut state = self.state.lock().expect("channel state lock poisoned");
            if matches!(*state, ChannelState::Errored) {
                return;
            }
            tracing::warn!(from = %*state, %message, "channel errored");
            *state = ChannelState::Errored;
        }
        let _ = self.events.send(ChannelEvent::Error { message });
    }
}

/// Client handler for the persistent channel: remote output flows into the
/// live sink; teardown marks the shared state closed.
struct LiveHandler {
    shared: Arc<ChannelShared>,
    sink: Arc<dyn OutputSink>,
}

#[async_trait]
impl client::Handler for LiveHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        // no known-hosts store; host trust is the operator's key setup
        Ok(true)
    }

    async fn data(
        &mut self,
        _channel: ChannelId,
        data: &[u8],
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        self.sink.write(data);
        Ok(())
    }

    async fn extended_data(
        &mut self,
        _channel: ChannelId,
        _ext: u32,
        data: &[u8],
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        self.sink.write(data);
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        _channel: ChannelId,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        self.shared.mark_closed();
        Ok(())
    }

    async fn channel_close(
        &mut self,
        _channel: ChannelId,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        self.shared.mark_closed();
        Ok(())
    }
}

/// The live transport resources, present only while connected.
struct LiveLink {
    session: client::Handle<LiveHandler>,
    channel: Channel<Msg>,
}

/// Production [`Remote`] implementation over SSH.
pub struct SshRemote {
    config: Arc<SessionConfig>,
    shared: Arc<ChannelShared>,
    live: Mutex<Option<LiveLink>>,
    sink: Arc<dyn OutputSink>,
}

impl SshRemote {
    /// Create a disconnected remote. `sink` receives the runner's output
    /// once the persistent channel connects.
    pub fn new(config: Arc<SessionConfig>, sink: Arc<dyn OutputSink>) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_EVENT_CAPACITY);
        Self {
            config,
            shared: Arc::new(ChannelShared {
                state: StdMutex::new(ChannelState::Disconnected),
                events,
            }),
            live: Mutex::new(None),
            sink,
        }
    }

    fn setup_failure(&self, e: russh::Error) -> ConnectionError {
        let err = ConnectionError::Transport(e.to_string());
        self.shared.mark_errored(err.to_string());
        err
    }
}

#[async_trait]
impl Remote for SshRemote {
    fn state(&self) -> ChannelState {
        self.shared.state()
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }

    async fn exec(
        &self,
        command: &str,
        stdout: Arc<dyn OutputSink>,
        stderr: Arc<dyn OutputSink>,
    ) -> Result<u32, ConnectionError> {
        exec::run(&self.config, command, stdout, stderr).await
    }

    async fn connect(&self) -> Result<(), ConnectionError> {
        {
            let mut state = self.shared.state.lock().expect("channel state lock poisoned");
            if matches!(*state, ChannelState::Connecting | ChannelState::Connected) {
                return Ok(());
            }
            *state = ChannelState::Connecting;
        }

        let handler = LiveHandler {
            shared: Arc::clone(&self.shared),
            sink: Arc::clone(&self.sink),
        };
        let session = match connect::open(&self.config, handler).await {
            Ok(session) => session,
            Err(err) => {
                self.shared.mark_errored(err.to_string());
                return Err(err);
            }
        };

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| self.setup_failure(e))?;
        // an interactive shell, so the runner gets a terminal and accepts
        // input lines such as the restart token
        channel
            .request_pty(false, "xterm", PTY_COLS, PTY_ROWS, 0, 0, &[])
            .await
            .map_err(|e| self.setup_failure(e))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| self.setup_failure(e))?;

        *self.live.lock().await = Some(LiveLink { session, channel });
        self.shared.set_state(ChannelState::Connected);
        let _ = self.shared.events.send(ChannelEvent::Connected);
        tracing::info!(address = %self.config.address(), "live channel connected");
        Ok(())
    }

    async fn send(&self, line: &str) -> Result<(), ChannelError> {
        if self.shared.state() != ChannelState::Connected {
            return Err(ChannelError::NotConnected);
        }
        let live = self.live.lock().await;
        let link = live.as_ref().ok_or(ChannelError::NotConnected)?;
        let payload = format!("{}\n", line);
        link.channel
            .data(payload.as_bytes())
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn close(&self) {
        let was = {
            let mut state = self.shared.state.lock().expect("channel state lock poisoned");
            let was = *state;
            match was {
                ChannelState::Closing | ChannelState::Closed => return,
                // errored is absorbing; still release the transport below
                ChannelState::Errored => {}
                _ => *state = ChannelState::Closing,
            }
            was
        };

        if let Some(link) = self.live.lock().await.take() {
            if let Err(e) = link
                .session
                .disconnect(Disconnect::ByApplication, "session closed", "en")
                .await
            {
                tracing::debug!("channel disconnect failed: {}", e);
            }
        }

        match was {
            ChannelState::Errored => {}
            // a channel that never connected closes silently
            ChannelState::Disconnected => self.shared.set_state(ChannelState::Closed),
            _ => self.shared.mark_closed(),
        }
    }
}
