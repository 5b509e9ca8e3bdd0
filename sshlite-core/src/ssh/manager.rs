//! Session registry.
//!
//! Holds at most one live [`Session`] per connection id. Each id has its own
//! slot lock, so opening one connection never waits on another.

use super::{CommandOutput, ConnectionSpec, RemoteShell, Transport};
use crate::error::{ExecutionError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// A live, authenticated session bound to one [`ConnectionSpec`].
pub struct Session {
    spec: ConnectionSpec,
    shell: Box<dyn RemoteShell>,
    /// Serializes command execution on this session.
    exec_lock: tokio::sync::Mutex<()>,
    dead: AtomicBool,
}

impl Session {
    pub fn new(spec: ConnectionSpec, shell: Box<dyn RemoteShell>) -> Self {
        Self {
            spec,
            shell,
            exec_lock: tokio::sync::Mutex::new(()),
            dead: AtomicBool::new(false),
        }
    }

    pub fn spec(&self) -> &ConnectionSpec {
        &self.spec
    }

    pub fn is_alive(&self) -> bool {
        !self.dead.load(Ordering::Acquire) && !self.shell.is_closed()
    }

    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    /// Run one command, waiting for any command already running on this
    /// session to finish first. `limit` covers both the wait and the run.
    pub async fn run(&self, command: &str, limit: Duration) -> Result<CommandOutput> {
        let deadline = Instant::now() + limit;
        let _guard = tokio::time::timeout_at(deadline, self.exec_lock.lock())
            .await
            .map_err(|_| ExecutionError::Timeout(limit))?;

        if !self.is_alive() {
            return Err(ExecutionError::Network(format!(
                "session for {} is closed",
                self.spec.endpoint()
            )));
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ExecutionError::Timeout(limit));
        }

        let result = self.shell.exec(command, remaining).await;
        match &result {
            Err(e) if e.is_transport_failure() => {
                log::warn!("Transport to {} failed: {}", self.spec.endpoint(), e);
                self.mark_dead();
            }
            Err(ExecutionError::Timeout(_)) => return Err(ExecutionError::Timeout(limit)),
            _ => {}
        }
        result
    }

    async fn disconnect(&self) {
        self.mark_dead();
        self.shell.disconnect().await;
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<Arc<Session>>>>;

/// Opens, hands out and closes sessions keyed by connection id.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    connect_timeout: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, connect_timeout: Duration) -> Self {
        Self {
            transport,
            connect_timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(id.to_string()).or_default().clone()
    }

    fn existing_slot(&self, id: &str) -> Option<Slot> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(id).cloned()
    }

    /// Return the live session for `spec.id`, connecting if there is none.
    pub async fn open(&self, spec: ConnectionSpec) -> Result<Arc<Session>> {
        let slot = self.slot(&spec.id);
        let mut current = slot.lock().await;

        if let Some(session) = current.as_ref() {
            if session.is_alive() {
                return Ok(session.clone());
            }
            log::info!("Replacing dead session for connection {}", spec.id);
            *current = None;
        }

        log::debug!("Opening session {} to {}", spec.id, spec.endpoint());
        let shell = tokio::time::timeout(self.connect_timeout, self.transport.connect(&spec))
            .await
            .map_err(|_| {
                ExecutionError::Network(format!(
                    "timed out connecting to {} after {:?}",
                    spec.endpoint(),
                    self.connect_timeout
                ))
            })??;

        let session = Arc::new(Session::new(spec, shell));
        *current = Some(session.clone());
        Ok(session)
    }

    /// Return the live session for `id` without reconnecting.
    pub async fn get(&self, id: &str) -> Result<Arc<Session>> {
        let slot = self
            .existing_slot(id)
            .ok_or_else(|| ExecutionError::NotConnected(id.to_string()))?;
        let mut current = slot.lock().await;

        match current.as_ref() {
            Some(session) if session.is_alive() => Ok(session.clone()),
            Some(_) => {
                log::info!("Evicting dead session for connection {}", id);
                *current = None;
                Err(ExecutionError::NotConnected(format!(
                    "{} (session was lost)",
                    id
                )))
            }
            None => Err(ExecutionError::NotConnected(id.to_string())),
        }
    }

    pub async fn is_connected(&self, id: &str) -> bool {
        self.get(id).await.is_ok()
    }

    /// Drop `failed` after a transport failure. The next `open` reconnects.
    ///
    /// Only evicts the slot while it still holds `failed`; a session opened
    /// since then is left alone.
    pub async fn invalidate(&self, id: &str, failed: &Arc<Session>) {
        failed.mark_dead();
        let Some(slot) = self.existing_slot(id) else {
            return;
        };
        let mut current = slot.lock().await;
        if current.as_ref().is_some_and(|s| Arc::ptr_eq(s, failed)) {
            *current = None;
            log::info!("Invalidated session for connection {}", id);
        }
    }

    /// Close the session for `id`. Unknown or already-closed ids are a no-op.
    pub async fn close(&self, id: &str) {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots.remove(id)
        };
        if let Some(slot) = slot {
            let session = slot.lock().await.take();
            if let Some(session) = session {
                session.disconnect().await;
            }
        }
    }

    pub fn connection_ids(&self) -> Vec<String> {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = slots.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn close_all(&self) {
        for id in self.connection_ids() {
            self.close(&id).await;
        }
    }
}
