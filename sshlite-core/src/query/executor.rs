use super::command::query_command;
use super::{parser, QueryResult};
use crate::config::Settings;
use crate::error::{ExecutionError, Result};
use crate::ssh::manager::Session;
use crate::ssh::CommandOutput;
use std::time::{Duration, Instant};

/// Runs SQL through the remote `sqlite3` binary over an open session.
#[derive(Clone, Debug)]
pub struct RemoteQueryExecutor {
    sqlite_binary: String,
    timeout: Duration,
}

impl RemoteQueryExecutor {
    pub fn new(sqlite_binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            sqlite_binary: sqlite_binary.into(),
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.sqlite_binary.clone(), settings.query_timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn execute(
        &self,
        session: &Session,
        database: &str,
        sql: &str,
    ) -> Result<QueryResult> {
        self.execute_with_timeout(session, database, sql, self.timeout).await
    }

    /// Like [`execute`](Self::execute) with a caller-supplied deadline in
    /// place of the configured one.
    pub async fn execute_with_timeout(
        &self,
        session: &Session,
        database: &str,
        sql: &str,
        limit: Duration,
    ) -> Result<QueryResult> {
        let command = query_command(&self.sqlite_binary, database, sql);
        let started = Instant::now();
        log::debug!(
            "Running {} byte statement against {} on {}",
            sql.len(),
            database,
            session.spec().endpoint()
        );

        let output = session.run(&command, limit).await?;
        check_status(&output)?;
        let result = parser::parse(&output.stdout)?;

        log::debug!(
            "Query on {} returned {} rows in {:?}",
            session.spec().endpoint(),
            result.rows().len(),
            started.elapsed()
        );
        Ok(result)
    }
}

/// Any stderr output, a signal, or a non-zero / missing exit status is a
/// failure of the remote command, reported with stderr as written.
fn check_status(output: &CommandOutput) -> Result<()> {
    let clean_exit = output.exit_status == Some(0) && output.exit_signal.is_none();
    if clean_exit && output.stderr.is_empty() {
        return Ok(());
    }

    Err(ExecutionError::RemoteCommand {
        exit_status: output.exit_status,
        exit_signal: output.exit_signal.clone(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{Number, Value};
    use crate::ssh::manager::ConnectionManager;
    use crate::testing::{insert_rows, spec, FakeTransport, LocalTransport, Script};
    use std::sync::Arc;

    async fn session(transport: &Arc<FakeTransport>) -> Arc<Session> {
        let mgr = ConnectionManager::new(transport.clone(), Duration::from_secs(5));
        mgr.open(spec("c1")).await.unwrap()
    }

    fn executor() -> RemoteQueryExecutor {
        RemoteQueryExecutor::new("sqlite3", Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_runs_quoted_command() {
        let transport = Arc::new(FakeTransport::new());
        let session = session(&transport).await;
        transport.push(Script::Stdout(insert_rows("n", &["1"])));

        let result = executor()
            .execute(&session, "/srv/c1.db", "SELECT 1 AS n")
            .await
            .unwrap();
        assert_eq!(result.rows()[0][0], Value::Number(Number::Integer(1)));
        assert_eq!(
            transport.commands()[0].1,
            "'sqlite3' -batch -bail -header -cmd '.mode insert' '/srv/c1.db' 'SELECT 1 AS n'"
        );
    }

    #[tokio::test]
    async fn test_empty_stdout_is_success() {
        let transport = Arc::new(FakeTransport::new());
        let session = session(&transport).await;
        transport.push(Script::Stdout(String::new()));

        let result = executor()
            .execute(&session, "/srv/c1.db", "CREATE TABLE t(a, b)")
            .await
            .unwrap();
        assert!(result.columns().is_empty());
        assert!(result.rows().is_empty());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_remote_command() {
        let transport = Arc::new(FakeTransport::new());
        let session = session(&transport).await;
        transport.push(Script::Fail(1, "Error: in prepare, no such table: nope\n"));

        let err = executor()
            .execute(&session, "/srv/c1.db", "SELECT * FROM nope")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ExecutionError::RemoteCommand {
                exit_status: Some(1),
                exit_signal: None,
                stderr: "Error: in prepare, no such table: nope\n".into(),
            }
        );
        assert!(session.is_alive());
    }

    #[tokio::test]
    async fn test_missing_binary_names_command() {
        let transport = Arc::new(FakeTransport::new());
        let session = session(&transport).await;
        transport.push(Script::Fail(127, "sh: 1: sqlite3: not found"));

        match executor().execute(&session, "/srv/c1.db", "SELECT 1").await {
            Err(ExecutionError::RemoteCommand { exit_status, stderr, .. }) => {
                assert_eq!(exit_status, Some(127));
                assert!(stderr.contains("sqlite3"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stderr_with_zero_exit_is_failure() {
        let transport = Arc::new(FakeTransport::new());
        let session = session(&transport).await;
        transport.push(Script::Warn("Error: database is locked"));

        let err = executor()
            .execute(&session, "/srv/c1.db", "SELECT 1")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::RemoteCommand { exit_status: Some(0), .. }));
    }

    #[tokio::test]
    async fn test_malformed_output_is_parse_error() {
        let transport = Arc::new(FakeTransport::new());
        let session = session(&transport).await;
        transport.push(Script::Stdout(insert_rows("a,b", &["1"])));

        let err = executor()
            .execute(&session, "/srv/c1.db", "SELECT a, b FROM t")
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Parse { .. }));
    }

    #[tokio::test]
    async fn test_timeout_reported() {
        let transport = Arc::new(FakeTransport::new());
        let session = session(&transport).await;
        transport.push(Script::Hang);

        let err = executor()
            .execute_with_timeout(&session, "/srv/c1.db", "SELECT 1", Duration::from_millis(30))
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Timeout(Duration::from_millis(30)));
    }

    #[test]
    fn test_signal_is_failure() {
        let output = CommandOutput {
            exit_status: None,
            exit_signal: Some("KILL".into()),
            ..Default::default()
        };
        match check_status(&output) {
            Err(ExecutionError::RemoteCommand {
                exit_status: None,
                exit_signal,
                stderr,
            }) => {
                assert_eq!(exit_signal.as_deref(), Some("KILL"));
                assert!(stderr.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    /// Drives a real `sqlite3` through the local shell when one is installed.
    #[tokio::test]
    async fn test_round_trip_with_local_sqlite3() {
        if !LocalTransport::sqlite3_available() {
            eprintln!("sqlite3 not installed, skipping");
            return;
        }
        let dir = std::env::temp_dir().join(format!("sshlite-exec-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let db = dir.join("round_trip.db");
        let _ = std::fs::remove_file(&db);
        let db = db.to_string_lossy().to_string();

        let mgr = ConnectionManager::new(Arc::new(LocalTransport), Duration::from_secs(5));
        let session = mgr.open(spec("local")).await.unwrap();
        let exec = executor();

        let created = exec
            .execute(&session, &db, "CREATE TABLE t(a, b)")
            .await
            .unwrap();
        assert!(created.columns().is_empty() && created.rows().is_empty());

        exec.execute(
            &session,
            &db,
            "INSERT INTO t VALUES (1, 'it''s, fine'), (9223372036854775807, 'two\nlines'), \
             (2.5, NULL), ('042', 'x')",
        )
        .await
        .unwrap();

        let result = exec.execute(&session, &db, "SELECT * FROM t").await.unwrap();
        assert_eq!(result.columns(), ["a", "b"]);
        assert_eq!(
            result.rows(),
            &[
                vec![Value::Number(Number::Integer(1)), Value::Text("it's, fine".into())],
                vec![
                    Value::Number(Number::Integer(i64::MAX)),
                    Value::Text("two\nlines".into())
                ],
                vec![Value::Number(Number::Real(2.5)), Value::Null],
                vec![Value::Text("042".into()), Value::Text("x".into())],
            ]
        );

        let err = exec.execute(&session, &db, "SELECT * FROM missing").await.unwrap_err();
        match err {
            ExecutionError::RemoteCommand { stderr, .. } => assert!(stderr.contains("missing")),
            other => panic!("unexpected {:?}", other),
        }

        let two_sets = exec
            .execute(&session, &db, "SELECT 1 AS a; SELECT 'x' AS b;")
            .await
            .unwrap_err();
        assert!(matches!(two_sets, ExecutionError::Parse { .. }), "{:?}", two_sets);

        let bad_text = exec
            .execute(&session, &db, "SELECT CAST(x'ff41' AS TEXT) AS v")
            .await
            .unwrap_err();
        assert!(matches!(bad_text, ExecutionError::Parse { .. }), "{:?}", bad_text);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
