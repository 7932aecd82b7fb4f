//! tether - sync a local project to a remote host and drive its process
//! runner over SSH
//!
//! What happens on start:
//! - sync the local directory content to the remote target directory
//! - run the install command to set up dependencies
//! - open a persistent SSH channel to view remote output
//! - run the start command in the remote directory
//!
//! Afterwards, local changes resync automatically and manifest changes
//! reinstall dependencies and restart the remote runner.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tether_core::config::{self, SessionOptions};
use tether_core::event::SessionEvent;
use tether_core::state::SessionState;
use tether_engine::Session;

mod output;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Sync a local directory to a remote host and run its file-watching process runner there")]
#[command(version)]
struct Args {
    /// Remote destination as [user@]host
    destination: Option<String>,

    /// SSH private key file
    #[arg(short = 'i', long)]
    identity_file: Option<PathBuf>,

    /// SSH agent socket path (usually found in SSH_AUTH_SOCK)
    #[arg(short = 'a', long)]
    key_agent: Option<PathBuf>,

    /// SSH password
    #[arg(short = 'P', long)]
    password: Option<String>,

    /// SSH username
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// SSH port
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Directory to synchronize (local)
    #[arg(short = 's', long)]
    source: Option<PathBuf>,

    /// Remote location to sync to
    #[arg(short = 't', long)]
    target: Option<String>,

    /// Installation / setup command
    #[arg(short = 'I', long)]
    install: Option<String>,

    /// Command to start on the remote (should implement a file watcher)
    #[arg(short = 'S', long)]
    start: Option<String>,

    /// URL of an alternative registry for package installs
    #[arg(short = 'r', long)]
    registry: Option<String>,

    /// Config file path
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Log all the things
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

/// Split a `[user@]host` destination argument.
fn parse_destination(destination: &str) -> (Option<String>, Option<String>) {
    match destination.split_once('@') {
        Some((user, host)) => (Some(user.to_string()), Some(host.to_string())),
        None => (None, Some(destination.to_string())),
    }
}

fn options_from_args(args: &Args) -> SessionOptions {
    let (destination_user, host) = match &args.destination {
        Some(destination) => parse_destination(destination),
        None => (None, None),
    };

    SessionOptions {
        host,
        username: args.user.clone().or(destination_user),
        port: args.port,
        keyfile: args.identity_file.clone(),
        agent: args.key_agent.clone(),
        password: args.password.clone(),
        source: args.source.clone(),
        target: args.target.clone(),
        install: args.install.clone(),
        registry: args.registry.clone(),
        start: args.start.clone(),
        verbose: args.verbose.then_some(true),
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // flags win over the config file, the config file over defaults
    let file_options = match &args.config {
        Some(path) => SessionOptions::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => config::default_config_path()
            .filter(|path| path.exists())
            .map(|path| SessionOptions::load(&path))
            .transpose()?
            .unwrap_or_default(),
    };
    let verbose = args.verbose;
    let config = options_from_args(&args)
        .merge(file_options)
        .resolve()
        .context("invalid session configuration")?;

    let session = Session::from_config(
        config,
        Arc::new(output::ToolSink),
        Arc::new(output::ToolErrSink),
        Arc::new(output::LiveSink),
    );

    let mut events = session.subscribe();
    let mut channel_events = session.channel_events();

    let _starter = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.start().await })
    };

    let mut exit_code = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.close().await;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if matches!(event, SessionEvent::Error { .. }) {
                        exit_code = 1;
                    }
                    let closing = matches!(event, SessionEvent::Close);
                    output::render(&event, verbose);
                    if closing {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("dropped {} session events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = channel_events.recv() => match event {
                Ok(event) => output::render_channel(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("dropped {} channel events", n);
                }
                // the live channel bus ends with the session; keep draining
                // session events until the close notification arrives
                Err(broadcast::error::RecvError::Closed) => {}
            },
        }
    }

    // let an in-progress shutdown finish releasing its resources
    if session.state() != SessionState::Closed {
        session.close().await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_destination_with_user() {
        assert_eq!(
            parse_destination("pi@192.168.0.4"),
            (Some("pi".to_string()), Some("192.168.0.4".to_string()))
        );
    }

    #[test]
    fn test_parse_destination_without_user() {
        assert_eq!(
            parse_destination("build-box"),
            (None, Some("build-box".to_string()))
        );
    }

    #[test]
    fn test_explicit_user_flag_wins_over_destination() {
        let args = Args::parse_from(["tether", "-u", "admin", "pi@192.168.0.4"]);
        let options = options_from_args(&args);
        assert_eq!(options.username.as_deref(), Some("admin"));
        assert_eq!(options.host.as_deref(), Some("192.168.0.4"));
    }

    #[test]
    fn test_flags_map_to_options() {
        let args = Args::parse_from([
            "tether",
            "-i",
            "/home/pi/.ssh/id_rsa",
            "-p",
            "2222",
            "-S",
            "sudo node johnny5",
            "-I",
            "npm install",
            "pi@192.168.0.4",
        ]);
        let options = options_from_args(&args);
        assert_eq!(
            options.keyfile,
            Some(PathBuf::from("/home/pi/.ssh/id_rsa"))
        );
        assert_eq!(options.port, Some(2222));
        assert_eq!(options.start.as_deref(), Some("sudo node johnny5"));
        assert_eq!(options.install.as_deref(), Some("npm install"));
        assert_eq!(options.verbose, None);
    }
}
