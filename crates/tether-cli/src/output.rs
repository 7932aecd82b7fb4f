//! Terminal rendering of session notifications
//!
//! The engine only guarantees well-typed notifications; mapping them to
//! human-readable lines (and picking which ones matter outside verbose
//! mode) happens here.

use std::io::Write;

use console::style;

use tether_core::event::{ChannelEvent, InstallPhase, SessionEvent};
use tether_core::sink::OutputSink;

/// Render one session event, honoring the verbosity flag.
pub fn render(event: &SessionEvent, verbose: bool) {
    match event {
        SessionEvent::Start => status("🐪  starting tether"),
        SessionEvent::Sync => status("✈  syncing files"),
        SessionEvent::SyncSkipped => {
            if verbose {
                println!("{}", style("✈  sync already in progress, skipped").dim());
            }
        }
        SessionEvent::SyncFailed { message } => {
            eprintln!("{}", style(format!("⚠  resync failed: {message}")).yellow());
        }
        SessionEvent::Install(InstallPhase::Triggered) => {
            if verbose {
                println!("{}", style("📦  dependency installation triggered").dim());
            }
        }
        SessionEvent::Install(InstallPhase::Started) => {
            status("📦  dependency installation started")
        }
        SessionEvent::Install(InstallPhase::Ended { exit_code }) => {
            status(&format!("📦  dependency installation ended ({exit_code})"))
        }
        SessionEvent::RunnerStart => status("🔃  remote runner started"),
        SessionEvent::Exec { command } => {
            if verbose {
                println!("{}", style(format!("$  {command}")).dim());
            }
        }
        SessionEvent::Close => status("🐪  shutting down tether"),
        SessionEvent::Error { message } => error(message),
    }
}

/// Render one persistent-channel event.
pub fn render_channel(event: &ChannelEvent) {
    match event {
        ChannelEvent::Connected => status("👀  live channel connected"),
        ChannelEvent::Closed => status("👀  live channel closed"),
        ChannelEvent::Error { message } => error(message),
    }
}

fn status(line: &str) {
    println!("{}", style(line).magenta());
}

/// Print a fatal error line to stderr.
pub fn error(message: &str) {
    eprintln!("{}", style(format!("💣  {message}")).red().bold());
}

/// Dim pass-through for transfer-tool and install output.
pub struct ToolSink;

impl OutputSink for ToolSink {
    fn write(&self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        print!("{}", style(text).dim());
        let _ = std::io::stdout().flush();
    }
}

/// Pass-through to stderr for tool diagnostics.
pub struct ToolErrSink;

impl OutputSink for ToolErrSink {
    fn write(&self, data: &[u8]) {
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(data);
        let _ = stderr.flush();
    }
}

/// Blue pass-through for the remote runner's live output.
pub struct LiveSink;

impl OutputSink for LiveSink {
    fn write(&self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        print!("{}", style(text).blue());
        let _ = std::io::stdout().flush();
    }
}
