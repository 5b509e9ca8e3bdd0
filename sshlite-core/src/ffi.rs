//! C FFI interface for host applications.
//!
//! All functions exported here are callable through the generated C header.
//! Naming convention: sshlite_<action>
//!
//! Strings returned by this module are owned by Rust and must be released
//! with `sshlite_string_free`. Failures are reported in-band as strings that
//! start with `Error`.

use crate::config::Settings;
use crate::error::ExecutionError;
use crate::gateway::{error_string, to_boundary, QueryGateway};
use crate::ssh::ConnectionSpec;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// Global tokio runtime for async SSH operations.
fn runtime() -> &'static tokio::runtime::Runtime {
    static RUNTIME: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("sshlite-worker")
            .enable_all()
            .build()
            .expect("Failed to create sshlite tokio runtime")
    })
}

/// Settings staged by `sshlite_configure` before the gateway starts.
static PENDING_SETTINGS: Mutex<Option<Settings>> = Mutex::new(None);
static GATEWAY: OnceLock<QueryGateway> = OnceLock::new();

fn gateway() -> &'static QueryGateway {
    GATEWAY.get_or_init(|| {
        let settings = PENDING_SETTINGS
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_default();
        log::info!("Starting query gateway with {:?}", settings);
        QueryGateway::from_settings(&settings)
    })
}

/// Borrow a C string, rejecting null and invalid UTF-8.
unsafe fn borrow_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, ExecutionError> {
    if ptr.is_null() {
        return Err(ExecutionError::InvalidRequest(format!("{} is null", what)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| ExecutionError::InvalidRequest(format!("{} is not valid UTF-8", what)))
}

/// Hand a string to the caller. Interior NULs (possible in remote stderr)
/// are replaced so the text is never silently truncated to nothing.
fn into_raw(s: String) -> *mut c_char {
    let s = if s.contains('\0') { s.replace('\0', "\u{FFFD}") } else { s };
    CString::new(s).unwrap_or_default().into_raw()
}

// ═══════════════════════════════════════════════════════════
// Lifecycle FFI
// ═══════════════════════════════════════════════════════════

/// Initialize the Rust logger.
#[no_mangle]
pub extern "C" fn sshlite_init() {
    let _ = env_logger::try_init();
    log::info!("sshlite core initialized");
}

/// Stage engine settings from a JSON object. Must be called before the first
/// connect or query; missing fields keep their defaults.
/// Returns 0 on success, -1 on invalid input, -2 if the engine already started.
#[no_mangle]
pub extern "C" fn sshlite_configure(settings_json: *const c_char) -> i32 {
    let json = match unsafe { borrow_str(settings_json, "settings") } {
        Ok(json) => json,
        Err(e) => {
            log::error!("{}", e);
            return -1;
        }
    };
    let settings = match Settings::from_json(json) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Invalid settings: {}", e);
            return -1;
        }
    };
    if GATEWAY.get().is_some() {
        log::warn!("sshlite_configure called after the engine started; ignoring");
        return -2;
    }
    *PENDING_SETTINGS.lock().unwrap_or_else(|e| e.into_inner()) = Some(settings);
    0
}

// ═══════════════════════════════════════════════════════════
// Connection FFI
// ═══════════════════════════════════════════════════════════

fn connect_json(spec_json: *const c_char) -> String {
    let spec = unsafe { borrow_str(spec_json, "connection spec") }.and_then(|json| {
        serde_json::from_str::<ConnectionSpec>(json)
            .map_err(|e| ExecutionError::InvalidRequest(format!("connection spec: {}", e)))
    });
    let spec = match spec {
        Ok(spec) => spec,
        Err(e) => return error_string(&e),
    };

    let id = spec.id.clone();
    match runtime().block_on(gateway().connect(spec)) {
        Ok(()) => serde_json::json!({ "id": id, "connected": true }).to_string(),
        Err(e) => {
            log::error!("Connect {} failed: {}", id, e);
            error_string(&e)
        }
    }
}

/// Open (or reuse) the session for a connection described as JSON:
/// `{"id", "host", "port", "user", "private_key_path", "passphrase"?,
/// "remote_database_path"}`.
/// Returns `{"id": ..., "connected": true}` or an `Error...` string.
/// Caller must free with sshlite_string_free.
#[no_mangle]
pub extern "C" fn sshlite_connect(spec_json: *const c_char) -> *mut c_char {
    into_raw(connect_json(spec_json))
}

/// Close the session for a connection id. Closing an unknown id is a no-op.
/// Returns 0 on success, -1 on invalid input.
#[no_mangle]
pub extern "C" fn sshlite_disconnect(connection_id: *const c_char) -> i32 {
    match unsafe { borrow_str(connection_id, "connection id") } {
        Ok(id) => {
            runtime().block_on(gateway().disconnect(id));
            0
        }
        Err(e) => {
            log::error!("{}", e);
            -1
        }
    }
}

/// Returns 1 if connected, 0 if not, -1 on invalid input.
#[no_mangle]
pub extern "C" fn sshlite_is_connected(connection_id: *const c_char) -> i32 {
    match unsafe { borrow_str(connection_id, "connection id") } {
        Ok(id) => {
            if runtime().block_on(gateway().manager().is_connected(id)) {
                1
            } else {
                0
            }
        }
        Err(_) => -1,
    }
}

// ═══════════════════════════════════════════════════════════
// Query FFI
// ═══════════════════════════════════════════════════════════

fn query_json(connection_id: *const c_char, sql: *const c_char, limit: Option<Duration>) -> String {
    let args = unsafe { borrow_str(connection_id, "connection id") }
        .and_then(|id| unsafe { borrow_str(sql, "sql") }.map(|sql| (id, sql)));
    let (id, sql) = match args {
        Ok(args) => args,
        Err(e) => return error_string(&e),
    };

    let gw = gateway();
    let outcome = match limit {
        Some(limit) => runtime().block_on(gw.query_with_timeout(id, sql, limit)),
        None => runtime().block_on(gw.query(id, sql)),
    };
    to_boundary(outcome)
}

/// Run SQL against the connection's remote database.
/// Returns a JSON array of row objects, or an `Error...` string.
/// Caller must free with sshlite_string_free.
#[no_mangle]
pub extern "C" fn sshlite_execute_query(
    connection_id: *const c_char,
    sql: *const c_char,
) -> *mut c_char {
    into_raw(query_json(connection_id, sql, None))
}

/// Like `sshlite_execute_query` with an explicit deadline in milliseconds.
#[no_mangle]
pub extern "C" fn sshlite_execute_query_timeout(
    connection_id: *const c_char,
    sql: *const c_char,
    timeout_ms: u64,
) -> *mut c_char {
    into_raw(query_json(connection_id, sql, Some(Duration::from_millis(timeout_ms))))
}

/// Check the remote host for sqlite3.
/// Returns JSON: {"available": bool, "path": "...", "version": "..."}
/// Caller must free with sshlite_string_free.
#[no_mangle]
pub extern "C" fn sshlite_probe(connection_id: *const c_char) -> *mut c_char {
    let out = match unsafe { borrow_str(connection_id, "connection id") } {
        Ok(id) => match runtime().block_on(gateway().probe(id)) {
            Ok(probe) => serde_json::to_string(&probe).unwrap_or_else(|e| format!("Error: {}", e)),
            Err(e) => error_string(&e),
        },
        Err(e) => error_string(&e),
    };
    into_raw(out)
}

// ═══════════════════════════════════════════════════════════
// Utility FFI
// ═══════════════════════════════════════════════════════════

/// Free a string allocated by Rust.
#[no_mangle]
pub extern "C" fn sshlite_string_free(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            drop(CString::from_raw(s));
        }
    }
}
