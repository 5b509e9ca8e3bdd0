//! Error taxonomy for remote query execution.

use std::time::Duration;
use thiserror::Error;

/// Every failure the query pipeline can produce.
///
/// Each variant is a distinct class a caller can act on: credentials,
/// reachability, host identity, deadlines, the remote binary's own
/// diagnostics, and output that does not match the wire contract.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    /// The private key could not be loaded or the server rejected it.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Host unreachable, connection refused, or the transport broke.
    #[error("network error: {0}")]
    Network(String),

    /// The server's host key did not pass verification.
    #[error("host key verification failed: {0}")]
    HostVerification(String),

    /// The remote command exceeded its deadline and was terminated.
    #[error("query timed out after {}s", .0.as_secs_f64())]
    Timeout(Duration),

    /// The remote process exited non-zero, was killed by a signal, or wrote
    /// to stderr. `stderr` is exactly what the process wrote.
    #[error(
        "remote command failed ({}): {}",
        exit_label(.exit_status, .exit_signal),
        .stderr.trim_end()
    )]
    RemoteCommand {
        exit_status: Option<u32>,
        exit_signal: Option<String>,
        stderr: String,
    },

    /// Remote output violated the parser's structural contract.
    #[error("could not parse remote output: {reason} (near {snippet:?})")]
    Parse { reason: String, snippet: String },

    /// No live session exists for the connection id.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// Malformed input at the boundary (bad JSON spec, invalid UTF-8, ...).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

fn exit_label(status: &Option<u32>, signal: &Option<String>) -> String {
    match (status, signal) {
        (_, Some(signal)) => format!("terminated by signal {}", signal),
        (Some(code), None) => format!("exit status {}", code),
        (None, None) => "no exit status".to_string(),
    }
}

impl ExecutionError {
    /// Build a parse error, keeping only a bounded prefix of the raw text.
    pub fn parse(reason: impl Into<String>, raw: &str) -> Self {
        const SNIPPET_CHARS: usize = 120;
        let snippet: String = raw.chars().take(SNIPPET_CHARS).collect();
        ExecutionError::Parse {
            reason: reason.into(),
            snippet,
        }
    }

    /// Whether this failure means the underlying transport can no longer be used.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, ExecutionError::Network(_))
    }
}

/// Convenience Result type for the query pipeline.
pub type Result<T> = std::result::Result<T, ExecutionError>;
