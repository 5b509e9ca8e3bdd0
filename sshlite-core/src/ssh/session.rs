use super::{CommandOutput, ConnectionSpec, RemoteShell, Transport};
use crate::config::{HostKeyPolicy, Settings};
use crate::error::{ExecutionError, Result};
use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::{check_known_hosts, load_secret_key, PrivateKeyWithHashAlg};
use russh::{client, Channel, ChannelMsg, Disconnect, Sig};
use std::sync::Arc;
use std::time::Duration;

/// SSH extended data stream number for stderr.
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

/// Opens russh sessions authenticated with a private key file.
pub struct SshTransport {
    settings: Settings,
}

impl SshTransport {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

/// Raised from the handler when the host key does not pass the policy.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct HostKeyRejected(String);

/// Client handler: host key verification only.
struct SshHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.policy {
            HostKeyPolicy::Accept => {
                log::warn!(
                    "Accepting host key for {}:{} without verification",
                    self.host,
                    self.port
                );
                Ok(true)
            }
            HostKeyPolicy::KnownHosts => {
                match check_known_hosts(&self.host, self.port, server_public_key) {
                    Ok(true) => Ok(true),
                    Ok(false) => Err(HostKeyRejected(format!(
                        "{}:{} is not in known_hosts",
                        self.host, self.port
                    ))
                    .into()),
                    Err(e) => Err(HostKeyRejected(format!(
                        "{}:{} does not match known_hosts: {}",
                        self.host, self.port, e
                    ))
                    .into()),
                }
            }
        }
    }
}

fn classify_connect_error(err: anyhow::Error, spec: &ConnectionSpec) -> ExecutionError {
    if let Some(rejected) = err.downcast_ref::<HostKeyRejected>() {
        return ExecutionError::HostVerification(rejected.0.clone());
    }
    if let Some(russh::Error::UnknownKey) = err.downcast_ref::<russh::Error>() {
        return ExecutionError::HostVerification(format!(
            "unknown host key for {}:{}",
            spec.host, spec.port
        ));
    }
    ExecutionError::Network(format!("cannot reach {}: {}", spec.endpoint(), err))
}

#[async_trait]
impl Transport for SshTransport {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn RemoteShell>> {
        let key_pair = load_secret_key(&spec.private_key_path, spec.passphrase.as_deref())
            .map_err(|e| {
                ExecutionError::Authentication(format!(
                    "cannot load private key {}: {}",
                    spec.private_key_path, e
                ))
            })?;

        let ssh_config = client::Config {
            keepalive_interval: self.settings.keepalive(),
            ..Default::default()
        };
        let handler = SshHandler {
            host: spec.host.clone(),
            port: spec.port,
            policy: self.settings.host_key_policy,
        };

        let mut handle = client::connect(
            Arc::new(ssh_config),
            (spec.host.as_str(), spec.port),
            handler,
        )
        .await
        .map_err(|e| classify_connect_error(e, spec))?;

        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .map_err(|e| ExecutionError::Network(format!("{}: {}", spec.endpoint(), e)))?
            .flatten();
        let key = PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg);
        let result = handle
            .authenticate_publickey(&spec.user, key)
            .await
            .map_err(|e| ExecutionError::Network(format!("{}: {}", spec.endpoint(), e)))?;

        match result {
            client::AuthResult::Success => {}
            client::AuthResult::Failure { .. } => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                    .await;
                return Err(ExecutionError::Authentication(format!(
                    "server rejected key {} for {}",
                    spec.private_key_path,
                    spec.endpoint()
                )));
            }
        }

        log::info!("SSH connected to {}", spec.endpoint());
        Ok(Box::new(SshShell {
            handle,
            endpoint: spec.endpoint(),
        }))
    }
}

/// An authenticated russh session.
pub struct SshShell {
    handle: client::Handle<SshHandler>,
    endpoint: String,
}

impl SshShell {
    fn lost(&self, e: russh::Error) -> ExecutionError {
        ExecutionError::Network(format!("connection to {} lost: {}", self.endpoint, e))
    }
}

/// Drain a channel until the server closes it.
async fn collect(channel: &mut Channel<client::Msg>, output: &mut CommandOutput) {
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { ref data } => output.stdout.extend_from_slice(data),
            ChannelMsg::ExtendedData { ref data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                output.stderr.extend_from_slice(data)
            }
            ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                output.exit_signal = Some(format!("{:?}", signal_name))
            }
            ChannelMsg::Close => break,
            _ => {}
        }
    }
}

/// A channel that ends without an exit status or signal was cut off by the
/// transport, not finished by the remote process.
fn completed(output: CommandOutput, endpoint: &str) -> Result<CommandOutput> {
    if output.exit_status.is_none() && output.exit_signal.is_none() {
        return Err(ExecutionError::Network(format!(
            "channel to {} ended before the command reported an exit status",
            endpoint
        )));
    }
    Ok(output)
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn exec(&self, command: &str, limit: Duration) -> Result<CommandOutput> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| self.lost(e))?;
        channel.exec(true, command).await.map_err(|e| self.lost(e))?;

        let mut output = CommandOutput::default();
        let finished = tokio::time::timeout(limit, collect(&mut channel, &mut output)).await;

        if finished.is_err() {
            log::warn!(
                "Command on {} timed out after {:?}, killing remote process",
                self.endpoint,
                limit
            );
            if let Err(e) = channel.signal(Sig::KILL).await {
                log::debug!("Failed to signal remote process: {}", e);
            }
            let _ = channel.close().await;
            return Err(ExecutionError::Timeout(limit));
        }

        let _ = channel.close().await;
        completed(output, &self.endpoint)
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn disconnect(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "User disconnect", "en")
            .await
        {
            log::debug!("SSH disconnect from {} reported: {}", self.endpoint, e);
        }
        log::info!("SSH disconnected from {}", self.endpoint);
    }
}
