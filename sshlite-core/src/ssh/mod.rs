pub mod manager;
pub mod probe;
pub mod session;

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// How to reach one remote database through one SSH identity.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConnectionSpec {
    pub id: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    pub private_key_path: String,
    #[serde(default)]
    pub passphrase: Option<String>,
    pub remote_database_path: String,
}

fn default_port() -> u16 {
    22
}

impl ConnectionSpec {
    /// `user@host:port`, used in log lines and error messages.
    pub fn endpoint(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Everything a finished remote process left behind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: Option<u32>,
    /// Set when the process was terminated by a signal instead of exiting.
    pub exit_signal: Option<String>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Opens authenticated sessions. The SSH implementation lives in
/// [`session::SshTransport`]; tests substitute a scripted one.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn RemoteShell>>;
}

/// An authenticated session able to run commands on fresh channels.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command` on a new channel and wait for it to finish.
    ///
    /// If `limit` elapses the remote process is killed, the channel is
    /// released and `Timeout` is returned; the session itself stays open.
    /// `Network` is returned only when the transport is gone.
    async fn exec(&self, command: &str, limit: Duration) -> Result<CommandOutput>;

    /// Whether the transport has reported itself closed.
    fn is_closed(&self) -> bool;

    async fn disconnect(&self);
}
