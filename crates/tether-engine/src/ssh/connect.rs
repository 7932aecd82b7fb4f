//! Transport setup and authentication
//!
//! The authentication method was resolved once at session construction;
//! every connection (one-shot or persistent) authenticates with that same
//! method.

use std::sync::Arc;

use russh::client::{self, Handle, Handler};

use tether_core::config::{AuthMethod, SessionConfig};
use tether_core::error::ConnectionError;

/// Establish an authenticated connection to the session's host.
///
/// The attempt is bounded by the configured ready timeout; the transport
/// sends keepalives at the configured interval afterwards.
pub(crate) async fn open<H>(config: &SessionConfig, handler: H) -> Result<Handle<H>, ConnectionError>
where
    H: Handler<Error = russh::Error> + Send + 'static,
{
    let ssh_config = Arc::new(client::Config {
        keepalive_interval: Some(config.keepalive_interval),
        ..Default::default()
    });

    let address = config.address();
    tracing::debug!(%address, "connecting");
    let mut session = tokio::time::timeout(
        config.ready_timeout,
        client::connect(ssh_config, (config.host.as_str(), config.port), handler),
    )
    .await
    .map_err(|_| ConnectionError::Timeout {
        address: address.clone(),
        timeout: config.ready_timeout,
    })?
    .map_err(|e| ConnectionError::Refused {
        address,
        detail: e.to_string(),
    })?;

    authenticate(&mut session, config).await?;
    Ok(session)
}

/// Authenticate an open transport with the session's resolved method.
async fn authenticate<H>(
    session: &mut Handle<H>,
    config: &SessionConfig,
) -> Result<(), ConnectionError>
where
    H: Handler<Error = russh::Error> + Send + 'static,
{
    let username = &config.username;
    let authenticated = match &config.auth {
        AuthMethod::KeyFile(path) => {
            let key = russh_keys::load_secret_key(path, None).map_err(|e| {
                ConnectionError::KeyFile {
                    path: path.clone(),
                    detail: e.to_string(),
                }
            })?;
            session
                .authenticate_publickey(username.as_str(), Arc::new(key))
                .await
                .map_err(|e| ConnectionError::Transport(e.to_string()))?
        }

        AuthMethod::Password(password) => session
            .authenticate_password(username.as_str(), password.as_str())
            .await
            .map_err(|e| ConnectionError::Transport(e.to_string()))?,

        AuthMethod::Agent(socket) => {
            let agent_error = |e: &dyn std::fmt::Display| ConnectionError::Agent {
                socket: socket.clone(),
                detail: e.to_string(),
            };
            let mut agent = russh_keys::agent::client::AgentClient::connect_uds(socket)
                .await
                .map_err(|e| agent_error(&e))?;
            let identities = agent
                .request_identities()
                .await
                .map_err(|e| agent_error(&e))?;
            if identities.is_empty() {
                return Err(ConnectionError::Agent {
                    socket: socket.clone(),
                    detail: "agent holds no identities".to_string(),
                });
            }

            let mut authenticated = false;
            for key in identities {
                let (returned, result) = session
                    .authenticate_future(username.as_str(), key, agent)
                    .await;
                agent = returned;
                if matches!(result, Ok(true)) {
                    authenticated = true;
                    break;
                }
            }
            authenticated
        }
    };

    if !authenticated {
        return Err(ConnectionError::AuthenticationFailed {
            username: username.clone(),
        });
    }
    tracing::debug!(user = %username, "authenticated");
    Ok(())
}
