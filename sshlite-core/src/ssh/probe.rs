//! Remote sqlite3 detection.
//!
//! Checks whether the configured `sqlite3` binary is on the remote PATH and
//! which version it is, using lightweight commands over the open session.

use super::manager::Session;
use crate::error::Result;
use crate::query::command::{locate_command, version_command};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What the remote host offers for running queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteProbe {
    pub available: bool,
    /// Resolved location of the binary, when found.
    pub path: Option<String>,
    pub version: Option<String>,
}

/// Probe the remote host for the sqlite3 binary.
///
/// A missing binary is a successful probe with `available: false`; only
/// transport problems and timeouts are errors.
pub async fn probe_sqlite(session: &Session, binary: &str, limit: Duration) -> Result<SqliteProbe> {
    let located = session.run(&locate_command(binary), limit).await?;
    let path = String::from_utf8_lossy(&located.stdout).trim().to_string();
    if located.exit_status != Some(0) || path.is_empty() {
        log::info!(
            "{} not found on {}",
            binary,
            session.spec().endpoint()
        );
        return Ok(SqliteProbe {
            available: false,
            path: None,
            version: None,
        });
    }

    let reported = session.run(&version_command(binary), limit).await?;
    let version = (reported.exit_status == Some(0))
        .then(|| parse_version(&String::from_utf8_lossy(&reported.stdout)))
        .flatten();

    log::info!(
        "Found {} {} on {}",
        path,
        version.as_deref().unwrap_or("(unknown version)"),
        session.spec().endpoint()
    );
    Ok(SqliteProbe {
        available: true,
        path: Some(path),
        version,
    })
}

/// Extract the version from `sqlite3 -version` output, e.g.
/// `3.45.1 2024-01-30 16:01:20 e876e51a...`.
fn parse_version(output: &str) -> Option<String> {
    output
        .split_whitespace()
        .map(|word| word.trim_end_matches(',').trim_end_matches(';'))
        .find(|word| word.starts_with(|c: char| c.is_ascii_digit()) && word.contains('.'))
        .map(str::to_string)
}
