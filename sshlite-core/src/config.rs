use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the client treats the server's host key.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Accept any host key (logged at warn level).
    #[default]
    Accept,
    /// Require the key to be present in the user's `~/.ssh/known_hosts`.
    KnownHosts,
}

/// Engine-wide settings. Every field has a default so a partial JSON
/// document is enough to override a single value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Upper bound on TCP connect + SSH handshake + authentication.
    pub connect_timeout_secs: u64,
    /// Wall-clock bound on a single remote `sqlite3` invocation.
    pub query_timeout_secs: u64,
    /// SSH keepalive interval; `0` disables keepalives.
    pub keepalive_secs: u64,
    pub host_key_policy: HostKeyPolicy,
    /// Name (or absolute path) of the remote sqlite3 binary.
    pub sqlite_binary: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            query_timeout_secs: 60,
            keepalive_secs: 30,
            host_key_policy: HostKeyPolicy::Accept,
            sqlite_binary: "sqlite3".to_string(),
        }
    }
}

impl Settings {
    /// Parse settings from a JSON object, falling back to defaults for
    /// missing fields.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    pub fn keepalive(&self) -> Option<Duration> {
        (self.keepalive_secs > 0).then(|| Duration::from_secs(self.keepalive_secs))
    }
}
