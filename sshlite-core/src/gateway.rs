//! The single entry point presentation layers call.
//!
//! Results cross the boundary as a string: a JSON array of row objects on
//! success, or text starting with `Error` on failure.

use crate::config::Settings;
use crate::error::{ExecutionError, Result};
use crate::query::executor::RemoteQueryExecutor;
use crate::query::QueryResult;
use crate::ssh::manager::ConnectionManager;
use crate::ssh::probe::{probe_sqlite, SqliteProbe};
use crate::ssh::session::SshTransport;
use crate::ssh::ConnectionSpec;
use std::sync::Arc;
use std::time::Duration;

pub struct QueryGateway {
    manager: Arc<ConnectionManager>,
    executor: RemoteQueryExecutor,
    sqlite_binary: String,
}

impl QueryGateway {
    pub fn new(
        manager: Arc<ConnectionManager>,
        executor: RemoteQueryExecutor,
        sqlite_binary: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            executor,
            sqlite_binary: sqlite_binary.into(),
        }
    }

    /// Gateway over real SSH connections.
    pub fn from_settings(settings: &Settings) -> Self {
        let transport = Arc::new(SshTransport::new(settings.clone()));
        let manager = Arc::new(ConnectionManager::new(transport, settings.connect_timeout()));
        Self::new(
            manager,
            RemoteQueryExecutor::from_settings(settings),
            settings.sqlite_binary.clone(),
        )
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub async fn connect(&self, spec: ConnectionSpec) -> Result<()> {
        self.manager.open(spec).await.map(|_| ())
    }

    pub async fn disconnect(&self, connection_id: &str) {
        self.manager.close(connection_id).await
    }

    /// Run `sql` on an open connection and return typed rows.
    pub async fn query(&self, connection_id: &str, sql: &str) -> Result<QueryResult> {
        self.query_with_timeout(connection_id, sql, self.executor.timeout()).await
    }

    pub async fn query_with_timeout(
        &self,
        connection_id: &str,
        sql: &str,
        limit: Duration,
    ) -> Result<QueryResult> {
        let session = self.manager.get(connection_id).await?;
        let database = session.spec().remote_database_path.clone();
        let result = self
            .executor
            .execute_with_timeout(&session, &database, sql, limit)
            .await;

        if let Err(e) = &result {
            if e.is_transport_failure() {
                self.manager.invalidate(connection_id, &session).await;
            }
            log::warn!("Query on connection {} failed: {}", connection_id, e);
        }
        result
    }

    /// Boundary form of [`query`](Self::query).
    pub async fn execute_query(&self, connection_id: &str, sql: &str) -> String {
        to_boundary(self.query(connection_id, sql).await)
    }

    pub async fn execute_query_with_timeout(
        &self,
        connection_id: &str,
        sql: &str,
        limit: Duration,
    ) -> String {
        to_boundary(self.query_with_timeout(connection_id, sql, limit).await)
    }

    /// Check the remote host for the sqlite3 binary.
    pub async fn probe(&self, connection_id: &str) -> Result<SqliteProbe> {
        let session = self.manager.get(connection_id).await?;
        let probe = probe_sqlite(&session, &self.sqlite_binary, self.executor.timeout()).await;
        if let Err(e) = &probe {
            if e.is_transport_failure() {
                self.manager.invalidate(connection_id, &session).await;
            }
        }
        probe
    }
}

/// Serialize an outcome for the presentation layer.
pub fn to_boundary(result: Result<QueryResult>) -> String {
    match result {
        Ok(rows) => rows.to_json().to_string(),
        Err(e) => error_string(&e),
    }
}

pub fn error_string(err: &ExecutionError) -> String {
    format!("Error: {}", err)
}

/// Whether a boundary string reports a failure.
pub fn is_error(payload: &str) -> bool {
    payload.starts_with("Error")
}
