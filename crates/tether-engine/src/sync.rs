//! Transfer tool invocation
//!
//! One [`SyncEngine`] performs full mirroring passes from the local source
//! directory to the remote target: archive, compress, and delete remote
//! files absent locally, excluding version-control and dependency-cache
//! directories. The remote-shell command embeds the session's resolved
//! authentication method, so the transfer tool and the SSH channel always
//! agree on how to reach the host.
//!
//! The engine executes unconditionally when called; exclusion between
//! overlapping passes lives in the orchestrator's guard layer.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use tether_core::config::{AuthMethod, SessionConfig, IGNORED_DIRS};
use tether_core::error::SyncError;
use tether_core::sink::{NullSink, OutputSink};
use tether_core::traits::CodeSync;

/// Default transfer tool binary
const DEFAULT_PROGRAM: &str = "rsync";

/// Bytes of trailing tool stderr retained for error diagnostics
const STDERR_TAIL_LIMIT: usize = 4096;

/// Read-chunk size for the output pumps
const READ_BUF_SIZE: usize = 4096;

/// Invokes the external file-mirroring tool.
pub struct SyncEngine {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    stdout: Arc<dyn OutputSink>,
    stderr: Arc<dyn OutputSink>,
}

impl SyncEngine {
    /// Build the invocation for a session. Output is discarded until sinks
    /// are attached.
    pub fn new(config: &SessionConfig) -> Self {
        let (args, envs) = build_invocation(config);
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            args,
            envs,
            stdout: Arc::new(NullSink),
            stderr: Arc::new(NullSink),
        }
    }

    /// Attach a sink receiving the tool's stdout.
    pub fn with_stdout(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.stdout = sink;
        self
    }

    /// Attach a sink receiving the tool's stderr.
    pub fn with_stderr(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.stderr = sink;
        self
    }

    /// Override the transfer tool binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// The full command line, for logging.
    pub fn command_line(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }

    #[cfg(test)]
    fn from_parts(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            envs: Vec::new(),
            stdout: Arc::new(NullSink),
            stderr: Arc::new(NullSink),
        }
    }
}

/// Assemble the tool's argument vector and child environment from the
/// session configuration.
fn build_invocation(config: &SessionConfig) -> (Vec<String>, Vec<(String, String)>) {
    let mut args = vec!["-az".to_string(), "--delete".to_string(), "--dirs".to_string()];
    for dir in IGNORED_DIRS {
        args.push("--exclude".to_string());
        args.push(format!("{}/", dir));
    }

    let mut envs = Vec::new();
    let shell = match &config.auth {
        // keys with a passphrase will not work here; use an agent instead
        AuthMethod::KeyFile(path) => {
            format!("ssh -i {} -p {}", path.display(), config.port)
        }
        AuthMethod::Agent(socket) => {
            envs.push(("SSH_AUTH_SOCK".to_string(), socket.display().to_string()));
            format!("ssh -p {}", config.port)
        }
        AuthMethod::Password(password) => format!(
            "sshpass -p {} ssh -o StrictHostKeyChecking=no -p {}",
            password, config.port
        ),
    };
    args.push("-e".to_string());
    args.push(shell);

    // trailing separator: mirror the directory contents, not the directory
    let mut source = config.source.display().to_string();
    if !source.ends_with('/') {
        source.push('/');
    }
    args.push(source);
    args.push(config.destination());

    (args, envs)
}

/// Pump one output pipe into a sink, optionally retaining a bounded tail.
async fn pump<R: AsyncRead + Unpin>(
    mut reader: R,
    sink: Arc<dyn OutputSink>,
    keep_tail: bool,
) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; READ_BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                sink.write(&buf[..n]);
                if keep_tail {
                    tail.extend_from_slice(&buf[..n]);
                    if tail.len() > STDERR_TAIL_LIMIT {
                        let cut = tail.len() - STDERR_TAIL_LIMIT;
                        tail.drain(..cut);
                    }
                }
            }
        }
    }
    String::from_utf8_lossy(&tail).trim().to_string()
}

#[async_trait]
impl CodeSync for SyncEngine {
    async fn execute(&self) -> Result<i32, SyncError> {
        tracing::debug!(command = %self.command_line(), "starting transfer");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| SyncError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdout_pipe = child.stdout.take().expect("child stdout is piped");
        let stderr_pipe = child.stderr.take().expect("child stderr is piped");
        let (_, tail) = join(
            pump(stdout_pipe, Arc::clone(&self.stdout), false),
            pump(stderr_pipe, Arc::clone(&self.stderr), true),
        )
        .await;

        let status = child.wait().await?;
        match status.code() {
            Some(0) => {
                tracing::debug!("transfer complete");
                Ok(0)
            }
            Some(code) => Err(SyncError::Failed { code, detail: tail }),
            None => Err(SyncError::Interrupted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tether_core::config::SessionOptions;
    use tether_core::sink::MemorySink;

    fn config_with(options: SessionOptions) -> SessionConfig {
        options
            .merge(SessionOptions {
                host: Some("192.168.0.4".into()),
                username: Some("pi".into()),
                source: Some(PathBuf::from("/tmp/project")),
                ..Default::default()
            })
            .resolve_with_env(|_| None)
            .unwrap()
    }

    #[test]
    fn test_invocation_with_keyfile() {
        let config = config_with(SessionOptions {
            keyfile: Some(PathBuf::from("/home/pi/.ssh/id_rsa")),
            ..Default::default()
        });
        let (args, envs) = build_invocation(&config);

        assert_eq!(args[0], "-az");
        assert!(args.contains(&"--delete".to_string()));
        assert!(args.contains(&"--dirs".to_string()));
        assert!(args.contains(&"node_modules/".to_string()));
        assert!(args.contains(&".git/".to_string()));
        assert!(args.contains(&"ssh -i /home/pi/.ssh/id_rsa -p 22".to_string()));
        assert_eq!(args.last().unwrap(), "pi@192.168.0.4:~/remote-sync");
        assert_eq!(args[args.len() - 2], "/tmp/project/");
        assert!(envs.is_empty());
    }

    #[test]
    fn test_invocation_with_agent_exports_socket() {
        let config = config_with(SessionOptions {
            agent: Some(PathBuf::from("/run/user/1000/ssh-agent.sock")),
            port: Some(2222),
            ..Default::default()
        });
        let (args, envs) = build_invocation(&config);

        assert!(args.contains(&"ssh -p 2222".to_string()));
        assert_eq!(
            envs,
            vec![(
                "SSH_AUTH_SOCK".to_string(),
                "/run/user/1000/ssh-agent.sock".to_string()
            )]
        );
    }

    #[test]
    fn test_invocation_with_password_uses_helper() {
        let config = config_with(SessionOptions {
            password: Some("hunter2".into()),
            ..Default::default()
        });
        let (args, _) = build_invocation(&config);

        let shell = args
            .iter()
            .find(|a| a.starts_with("sshpass"))
            .expect("password shell command");
        assert!(shell.contains("sshpass -p hunter2"));
        assert!(shell.contains("StrictHostKeyChecking=no"));
    }

    #[test]
    fn test_source_keeps_single_trailing_separator() {
        let config = config_with(SessionOptions {
            keyfile: Some(PathBuf::from("/k")),
            source: Some(PathBuf::from("/tmp/project/")),
            ..Default::default()
        });
        let (args, _) = build_invocation(&config);
        assert_eq!(args[args.len() - 2], "/tmp/project/");
    }

    #[tokio::test]
    async fn test_execute_streams_output_and_succeeds() {
        let stdout = Arc::new(MemorySink::new());
        let engine = SyncEngine::from_parts("sh", &["-c", "printf 'sent 42 bytes'"])
            .with_stdout(Arc::clone(&stdout) as Arc<dyn OutputSink>);

        let code = engine.execute().await.unwrap();
        assert_eq!(code, 0);
        assert_eq!(stdout.to_string_lossy(), "sent 42 bytes");
    }

    #[tokio::test]
    async fn test_execute_failure_carries_diagnostics() {
        let engine =
            SyncEngine::from_parts("sh", &["-c", "printf 'connection refused' >&2; exit 12"]);

        let err = engine.execute().await.unwrap_err();
        match err {
            SyncError::Failed { code, detail } => {
                assert_eq!(code, 12);
                assert!(detail.contains("connection refused"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_missing_program() {
        let engine = SyncEngine::from_parts("definitely-not-a-real-tool", &[]);
        let err = engine.execute().await.unwrap_err();
        assert!(matches!(err, SyncError::Spawn { .. }));
    }
}
