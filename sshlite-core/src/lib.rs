//! sshlite core — query SQLite databases that live on remote hosts
//!
//! Authenticates over SSH, runs the remote `sqlite3` binary against the
//! database file and parses its output into typed rows, exposed through
//! a C FFI interface and an async Rust API.

pub mod config;
pub mod error;
pub mod ffi;
pub mod gateway;
pub mod query;
pub mod ssh;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{HostKeyPolicy, Settings};
pub use error::{ExecutionError, Result};
pub use gateway::QueryGateway;
pub use query::{Number, QueryResult, Value};
pub use ssh::ConnectionSpec;
