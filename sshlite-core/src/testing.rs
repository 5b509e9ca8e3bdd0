//! Scripted and local transports for unit tests.

use crate::error::{ExecutionError, Result};
use crate::ssh::{CommandOutput, ConnectionSpec, RemoteShell, Transport};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) fn spec(id: &str) -> ConnectionSpec {
    ConnectionSpec {
        id: id.to_string(),
        host: format!("{}.example.com", id),
        port: 22,
        user: "alice".to_string(),
        private_key_path: "/home/alice/.ssh/id_ed25519".to_string(),
        passphrase: None,
        remote_database_path: format!("/srv/{}.db", id),
    }
}

/// Insert-mode output for `values` rows under one column list, as
/// `sqlite3 -header -cmd '.mode insert'` prints it.
pub(crate) fn insert_rows(columns: &str, values: &[&str]) -> String {
    values
        .iter()
        .map(|v| format!("INSERT INTO \"table\"({}) VALUES({});\n", columns, v))
        .collect()
}

/// What the next `exec` call does.
#[derive(Clone, Debug)]
pub(crate) enum Script {
    /// Exit 0 with this stdout.
    Stdout(String),
    /// Exit with a status and stderr text.
    Fail(u32, &'static str),
    /// Exit 0 but write to stderr.
    Warn(&'static str),
    /// The transport breaks.
    Network(&'static str),
    /// Never finishes; the call ends in a timeout.
    Hang,
    /// Sleep, then exit 0 with this stdout.
    Slow(Duration, String),
}

#[derive(Default)]
struct Shared {
    scripts: Mutex<VecDeque<Script>>,
    default: Mutex<Option<Script>>,
    commands: Mutex<Vec<(String, String)>>,
    active: Mutex<HashMap<String, usize>>,
    max_active: Mutex<HashMap<String, usize>>,
    total_active: AtomicUsize,
    max_total_active: AtomicUsize,
    connects: AtomicUsize,
    connect_failure: Mutex<Option<ExecutionError>>,
}

/// A transport whose sessions replay queued [`Script`]s.
pub(crate) struct FakeTransport {
    shared: Arc<Shared>,
    connect_delay: Duration,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            connect_delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub(crate) fn push(&self, script: Script) {
        self.shared.scripts.lock().unwrap().push_back(script);
    }

    /// Used when the queue is empty. Without a default, sessions answer with
    /// empty stdout.
    pub(crate) fn set_default(&self, script: Script) {
        *self.shared.default.lock().unwrap() = Some(script);
    }

    pub(crate) fn fail_next_connect(&self, err: ExecutionError) {
        *self.shared.connect_failure.lock().unwrap() = Some(err);
    }

    pub(crate) fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// `(connection id, command)` for every executed command, in order.
    pub(crate) fn commands(&self) -> Vec<(String, String)> {
        self.shared.commands.lock().unwrap().clone()
    }

    /// Highest number of commands ever running at once on one connection.
    pub(crate) fn max_active(&self, id: &str) -> usize {
        self.shared
            .max_active
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of commands ever running at once across connections.
    pub(crate) fn max_total_active(&self) -> usize {
        self.shared.max_total_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, spec: &ConnectionSpec) -> Result<Box<dyn RemoteShell>> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if let Some(err) = self.shared.connect_failure.lock().unwrap().take() {
            return Err(err);
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeShell {
            id: spec.id.clone(),
            shared: self.shared.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

struct FakeShell {
    id: String,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl FakeShell {
    fn enter(&self) {
        let mut active = self.shared.active.lock().unwrap();
        let count = active.entry(self.id.clone()).or_default();
        *count += 1;
        let mut max = self.shared.max_active.lock().unwrap();
        let peak = max.entry(self.id.clone()).or_default();
        *peak = (*peak).max(*count);

        let total = self.shared.total_active.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_total_active.fetch_max(total, Ordering::SeqCst);
    }

    fn leave(&self) {
        let mut active = self.shared.active.lock().unwrap();
        if let Some(count) = active.get_mut(&self.id) {
            *count -= 1;
        }
        self.shared.total_active.fetch_sub(1, Ordering::SeqCst);
    }

    fn next_script(&self) -> Script {
        let queued = self.shared.scripts.lock().unwrap().pop_front();
        queued
            .or_else(|| self.shared.default.lock().unwrap().clone())
            .unwrap_or_else(|| Script::Stdout(String::new()))
    }
}

fn exited(status: u32, stdout: &str, stderr: &str) -> CommandOutput {
    CommandOutput {
        exit_status: Some(status),
        exit_signal: None,
        stdout: stdout.as_bytes().to_vec(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

#[async_trait]
impl RemoteShell for FakeShell {
    async fn exec(&self, command: &str, limit: Duration) -> Result<CommandOutput> {
        self.shared
            .commands
            .lock()
            .unwrap()
            .push((self.id.clone(), command.to_string()));

        self.enter();
        let result = match self.next_script() {
            Script::Stdout(out) => Ok(exited(0, &out, "")),
            Script::Fail(status, stderr) => Ok(exited(status, "", stderr)),
            Script::Warn(stderr) => Ok(exited(0, "", stderr)),
            Script::Network(msg) => {
                self.closed.store(true, Ordering::SeqCst);
                Err(ExecutionError::Network(msg.to_string()))
            }
            Script::Hang => {
                tokio::time::sleep(limit).await;
                Err(ExecutionError::Timeout(limit))
            }
            Script::Slow(delay, out) => {
                if delay > limit {
                    tokio::time::sleep(limit).await;
                    Err(ExecutionError::Timeout(limit))
                } else {
                    tokio::time::sleep(delay).await;
                    Ok(exited(0, &out, ""))
                }
            }
        };
        self.leave();
        result
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Runs commands with the local `sh`, so tests can drive a real `sqlite3`.
pub(crate) struct LocalTransport;

impl LocalTransport {
    /// Whether a `sqlite3` binary is on this machine's PATH.
    pub(crate) fn sqlite3_available() -> bool {
        std::process::Command::new("sqlite3")
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn connect(&self, _spec: &ConnectionSpec) -> Result<Box<dyn RemoteShell>> {
        Ok(Box::new(LocalShell))
    }
}

struct LocalShell;

#[async_trait]
impl RemoteShell for LocalShell {
    async fn exec(&self, command: &str, limit: Duration) -> Result<CommandOutput> {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(command).kill_on_drop(true);
        match tokio::time::timeout(limit, cmd.output()).await {
            Ok(Ok(out)) => Ok(CommandOutput {
                exit_status: out.status.code().map(|c| c as u32),
                exit_signal: None,
                stdout: out.stdout,
                stderr: out.stderr,
            }),
            Ok(Err(e)) => Err(ExecutionError::Network(e.to_string())),
            Err(_) => Err(ExecutionError::Timeout(limit)),
        }
    }

    fn is_closed(&self) -> bool {
        false
    }

    async fn disconnect(&self) {}
}
