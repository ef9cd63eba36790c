//! SSH remote execution
//!
//! Opens one russh session per logical host operation and runs each command
//! on its own channel, collecting stdout, stderr and the exit status.

use crate::domain::ports::{CommandOutput, Credentials, RemoteExecutor, RemoteSession};
use crate::error::{Error, Result};
use async_trait::async_trait;
use russh::client;
use russh_keys::key::PublicKey;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Connection settings shared by every session
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub port: u16,
    /// Connect and inactivity timeout
    pub timeout: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            port: 22,
            timeout: Duration::from_secs(30),
        }
    }
}

struct SshHandler;

#[async_trait]
impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        // TODO: verify against known_hosts once host keys are distributed with the config
        Ok(true)
    }
}

/// [`RemoteExecutor`] over SSH with password authentication
pub struct SshExecutor {
    settings: SshSettings,
}

impl SshExecutor {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn connect(&self, host: &str, login: &Credentials) -> Result<Box<dyn RemoteSession>> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.settings.timeout),
            ..Default::default()
        });

        let stream = tokio::time::timeout(self.settings.timeout, TcpStream::connect((host, self.settings.port)))
            .await
            .map_err(|_| Error::remote(host, format!("connection timed out after {:?}", self.settings.timeout)))?
            .map_err(|e| Error::remote(host, e))?;

        let mut session = client::connect_stream(config, stream, SshHandler)
            .await
            .map_err(|e| Error::remote(host, e))?;

        let authenticated = session
            .authenticate_password(&login.user, &login.password)
            .await
            .map_err(|e| Error::remote(host, e))?;
        if !authenticated {
            return Err(Error::remote(
                host,
                format!("authentication failed for user '{}'", login.user),
            ));
        }

        debug!("SSH session open to {} as {}", host, login.user);
        Ok(Box::new(SshSession {
            session,
            host: host.to_string(),
        }))
    }
}

struct SshSession {
    session: client::Handle<SshHandler>,
    host: String,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run(&self, command: &str) -> Result<CommandOutput> {
        let mut channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|e| Error::remote(&self.host, e))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::remote(&self.host, e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        loop {
            match channel.wait().await {
                Some(russh::ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                Some(russh::ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(russh::ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
                Some(russh::ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        Ok(CommandOutput::from_text(
            &String::from_utf8_lossy(&stdout),
            &String::from_utf8_lossy(&stderr),
            exit_status,
        ))
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if let Err(e) = self
            .session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            warn!("Closing SSH session to {} failed: {}", self.host, e);
        }
        Ok(())
    }
}
