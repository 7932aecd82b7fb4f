//! Session configuration
//!
//! A session is described twice: `SessionOptions` is the partially-specified
//! form gathered from CLI flags and an optional TOML config file, and
//! `SessionConfig` is the fully-resolved, immutable form the engine runs on.
//! Authentication resolution happens exactly once, in
//! [`SessionOptions::resolve`], before any network operation.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Default remote directory the source tree is mirrored into
pub const DEFAULT_TARGET: &str = "~/remote-sync";

/// Default dependency installation command
pub const DEFAULT_INSTALL: &str = "yarn";

/// Default remote start command (expected to implement its own file watcher)
pub const DEFAULT_START: &str = "nodemon .";

/// Default dependency manifest file; a change to it triggers a reinstall
pub const DEFAULT_MANIFEST: &str = "package.json";

/// Default transport keepalive interval in milliseconds
pub const DEFAULT_KEEPALIVE_MS: u64 = 500;

/// Default connection-ready timeout in milliseconds
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 2000;

/// Directories excluded from both mirroring and change watching
pub const IGNORED_DIRS: [&str; 2] = [".git", "node_modules"];

/// Environment variables probed for an SSH agent socket, in order
const AGENT_ENV_VARS: [&str; 2] = ["SSH_AUTH_SOCK", "SSH_AGENT_SOCK"];

/// The authentication method a session uses for every remote operation.
///
/// Exactly one method is resolved at construction and shared by the transfer
/// tool invocation and the SSH transport.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthMethod {
    /// Private key file (keys with a passphrase need an agent instead)
    KeyFile(PathBuf),
    /// SSH agent socket
    Agent(PathBuf),
    /// Plain password, passed to the transfer tool via a helper
    Password(String),
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
            AuthMethod::Agent(path) => f.debug_tuple("Agent").field(path).finish(),
            AuthMethod::Password(_) => f.debug_tuple("Password").field(&"<redacted>").finish(),
        }
    }
}

/// Partially-specified session options, as gathered from the CLI and an
/// optional TOML config file. Every field is optional; defaults are applied
/// during [`resolve`](Self::resolve).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionOptions {
    /// Remote host name or address
    pub host: Option<String>,
    /// SSH port
    pub port: Option<u16>,
    /// SSH username
    pub username: Option<String>,
    /// Path to an SSH private key file
    pub keyfile: Option<PathBuf>,
    /// Path to an SSH agent socket
    pub agent: Option<PathBuf>,
    /// SSH password
    pub password: Option<String>,
    /// Local directory to mirror
    pub source: Option<PathBuf>,
    /// Remote directory to mirror into
    pub target: Option<String>,
    /// Dependency installation command
    pub install: Option<String>,
    /// Alternative package registry appended to the install command
    pub registry: Option<String>,
    /// Remote start command
    pub start: Option<String>,
    /// Dependency manifest file name
    pub manifest: Option<String>,
    /// Stream tool output
    pub verbose: Option<bool>,
    /// Transport keepalive interval in milliseconds
    pub keepalive_ms: Option<u64>,
    /// Connection-ready timeout in milliseconds
    pub ready_timeout_ms: Option<u64>,
}

impl SessionOptions {
    /// Load options from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", path.display(), e)))?;
        Ok(toml::from_str(&contents)?)
    }

    /// Merge two option sets; fields present in `self` win over `fallback`.
    pub fn merge(self, fallback: Self) -> Self {
        Self {
            host: self.host.or(fallback.host),
            port: self.port.or(fallback.port),
            username: self.username.or(fallback.username),
            keyfile: self.keyfile.or(fallback.keyfile),
            agent: self.agent.or(fallback.agent),
            password: self.password.or(fallback.password),
            source: self.source.or(fallback.source),
            target: self.target.or(fallback.target),
            install: self.install.or(fallback.install),
            registry: self.registry.or(fallback.registry),
            start: self.start.or(fallback.start),
            manifest: self.manifest.or(fallback.manifest),
            verbose: self.verbose.or(fallback.verbose),
            keepalive_ms: self.keepalive_ms.or(fallback.keepalive_ms),
            ready_timeout_ms: self.ready_timeout_ms.or(fallback.ready_timeout_ms),
        }
    }

    /// Resolve the options into an immutable [`SessionConfig`], applying
    /// defaults and selecting the authentication method.
    ///
    /// Method precedence: key file, then password, then an explicit agent
    /// socket, then the `SSH_AUTH_SOCK` / `SSH_AGENT_SOCK` environment
    /// variables. Fails with [`ConfigError::NoAuthMethod`] when none is
    /// available, before any network call is attempted.
    pub fn resolve(self) -> Result<SessionConfig, ConfigError> {
        self.resolve_with_env(|name| std::env::var(name).ok())
    }

    /// Like [`resolve`](Self::resolve) with an injected environment lookup.
    pub fn resolve_with_env<F>(self, env: F) -> Result<SessionConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = self
            .host
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::MissingField("host".into()))?;
        let username = self
            .username
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ConfigError::MissingField("username".into()))?;

        let auth = if let Some(keyfile) = self.keyfile {
            AuthMethod::KeyFile(keyfile)
        } else if let Some(password) = self.password {
            AuthMethod::Password(password)
        } else if let Some(agent) = self.agent {
            AuthMethod::Agent(agent)
        } else {
            AGENT_ENV_VARS
                .iter()
                .find_map(|name| env(name).filter(|v| !v.is_empty()))
                .map(|socket| AuthMethod::Agent(PathBuf::from(socket)))
                .ok_or(ConfigError::NoAuthMethod)?
        };

        let install = self.install.unwrap_or_else(|| DEFAULT_INSTALL.to_string());
        let install = match self.registry {
            Some(registry) => format!("{} --registry {}", install, registry),
            None => install,
        };

        Ok(SessionConfig {
            host,
            port: self.port.unwrap_or(DEFAULT_PORT),
            username,
            auth,
            source: self.source.unwrap_or_else(|| PathBuf::from(".")),
            target: self.target.unwrap_or_else(|| DEFAULT_TARGET.to_string()),
            install,
            start: self.start.unwrap_or_else(|| DEFAULT_START.to_string()),
            manifest: self.manifest.unwrap_or_else(|| DEFAULT_MANIFEST.to_string()),
            verbose: self.verbose.unwrap_or(false),
            keepalive_interval: Duration::from_millis(
                self.keepalive_ms.unwrap_or(DEFAULT_KEEPALIVE_MS),
            ),
            ready_timeout: Duration::from_millis(
                self.ready_timeout_ms.unwrap_or(DEFAULT_READY_TIMEOUT_MS),
            ),
        })
    }
}

/// Fully-resolved session configuration.
///
/// Immutable once the session starts; shared read-only across tasks.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Remote host name or address
    pub host: String,
    /// SSH port
    pub port: u16,
    /// SSH username
    pub username: String,
    /// Resolved authentication method
    pub auth: AuthMethod,
    /// Local directory to mirror
    pub source: PathBuf,
    /// Remote directory to mirror into
    pub target: String,
    /// Dependency installation command (registry already folded in)
    pub install: String,
    /// Remote start command
    pub start: String,
    /// Dependency manifest file name
    pub manifest: String,
    /// Stream tool output to the configured sinks
    pub verbose: bool,
    /// Transport keepalive interval
    pub keepalive_interval: Duration,
    /// Connection-ready timeout
    pub ready_timeout: Duration,
}

impl SessionConfig {
    /// The `host:port` address the transport dials.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The `user@host:target` destination the transfer tool mirrors into.
    pub fn destination(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.target)
    }
}

/// Default config file location (`<config dir>/tether/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tether").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn minimal() -> SessionOptions {
        SessionOptions {
            host: Some("192.168.0.4".into()),
            username: Some("pi".into()),
            keyfile: Some(PathBuf::from("/home/pi/.ssh/id_rsa")),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let config = minimal().resolve_with_env(no_env).unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(config.target, "~/remote-sync");
        assert_eq!(config.install, "yarn");
        assert_eq!(config.start, "nodemon .");
        assert_eq!(config.manifest, "package.json");
        assert_eq!(config.keepalive_interval, Duration::from_millis(500));
        assert_eq!(config.ready_timeout, Duration::from_millis(2000));
        assert!(!config.verbose);
    }

    #[test]
    fn test_registry_appended_to_install() {
        let mut options = minimal();
        options.install = Some("npm install".into());
        options.registry = Some("http://localhost:4873".into());
        let config = options.resolve_with_env(no_env).unwrap();
        assert_eq!(config.install, "npm install --registry http://localhost:4873");
    }

    #[test]
    fn test_keyfile_takes_precedence_over_password() {
        let mut options = minimal();
        options.password = Some("hunter2".into());
        let config = options.resolve_with_env(no_env).unwrap();
        assert!(matches!(config.auth, AuthMethod::KeyFile(_)));
    }

    #[test]
    fn test_password_takes_precedence_over_agent() {
        let mut options = minimal();
        options.keyfile = None;
        options.password = Some("hunter2".into());
        options.agent = Some(PathBuf::from("/tmp/agent.sock"));
        let config = options.resolve_with_env(no_env).unwrap();
        assert_eq!(config.auth, AuthMethod::Password("hunter2".into()));
    }

    #[test]
    fn test_agent_socket_from_environment() {
        let mut options = minimal();
        options.keyfile = None;
        let config = options
            .resolve_with_env(|name| {
                (name == "SSH_AUTH_SOCK").then(|| "/run/user/1000/ssh-agent.sock".to_string())
            })
            .unwrap();
        assert_eq!(
            config.auth,
            AuthMethod::Agent(PathBuf::from("/run/user/1000/ssh-agent.sock"))
        );
    }

    #[test]
    fn test_no_auth_method_fails_resolution() {
        let mut options = minimal();
        options.keyfile = None;
        let err = options.resolve_with_env(no_env).unwrap_err();
        assert!(matches!(err, ConfigError::NoAuthMethod));
    }

    #[test]
    fn test_missing_host_fails_resolution() {
        let mut options = minimal();
        options.host = None;
        let err = options.resolve_with_env(no_env).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(field) if field == "host"));
    }

    #[test]
    fn test_merge_prefers_self() {
        let flags = SessionOptions {
            port: Some(2222),
            ..Default::default()
        };
        let file = SessionOptions {
            port: Some(22),
            install: Some("npm ci".into()),
            ..Default::default()
        };
        let merged = flags.merge(file);
        assert_eq!(merged.port, Some(2222));
        assert_eq!(merged.install.as_deref(), Some("npm ci"));
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
host = "build-box"
username = "dev"
port = 2200
install = "npm ci"
verbose = true
"#,
        )
        .unwrap();

        let options = SessionOptions::load(&path).unwrap();
        assert_eq!(options.host.as_deref(), Some("build-box"));
        assert_eq!(options.port, Some(2200));
        assert_eq!(options.verbose, Some(true));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SessionOptions::load(Path::new("/nonexistent/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_destination_format() {
        let config = minimal().resolve_with_env(no_env).unwrap();
        assert_eq!(config.destination(), "pi@192.168.0.4:~/remote-sync");
        assert_eq!(config.address(), "192.168.0.4:22");
    }

    #[test]
    fn test_password_debug_redacted() {
        let auth = AuthMethod::Password("hunter2".into());
        assert!(!format!("{:?}", auth).contains("hunter2"));
    }
}
