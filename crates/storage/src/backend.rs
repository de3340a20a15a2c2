//! Backend bootstrap and per-connection setup
//!
//! `init_backend` runs once per process before the first connection is
//! opened. `configure_connection` runs the mandatory setup steps on every
//! fresh connection; any failure there is surfaced as [`PackError::Setup`].

use crate::regexp::register_regexp;
use once_cell::sync::OnceCell;
use rusqlite::config::DbConfig;
use rusqlite::{ffi, Connection, OpenFlags};
use sqlpack_core::{
    OpenMode, PackError, PackResult, SetupStep, ENTRIES_DATA_COLUMN, ENTRIES_INDEX,
    ENTRIES_NAME_COLUMN, ENTRIES_TABLE,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

static BACKEND: OnceCell<BackendInfo> = OnceCell::new();

/// Facts about the linked storage backend
#[derive(Debug, Clone)]
pub struct BackendInfo {
    /// Library version string
    pub version: &'static str,
    /// Whether the library was compiled thread-safe
    pub threadsafe: bool,
    /// Whether encrypted archives are supported
    pub encryption: bool,
}

/// Initialize the storage backend exactly once per process.
///
/// Safe to call from any thread and any number of times.
pub fn init_backend() -> PackResult<&'static BackendInfo> {
    BACKEND.get_or_try_init(|| {
        // SAFETY: sqlite3_initialize is idempotent and serializes itself internally.
        let rc = unsafe { ffi::sqlite3_initialize() };
        if rc != ffi::SQLITE_OK {
            return Err(PackError::Backend(rusqlite::Error::SqliteFailure(
                ffi::Error::new(rc),
                Some("backend initialization failed".to_string()),
            )));
        }
        // SAFETY: pure query of a compile-time setting.
        let threadsafe = unsafe { ffi::sqlite3_threadsafe() } != 0;
        let info = BackendInfo {
            version: rusqlite::version(),
            threadsafe,
            encryption: encryption_available(),
        };
        info!(
            target: "sqlpack::backend",
            version = info.version,
            threadsafe = info.threadsafe,
            encryption = info.encryption,
            "Storage backend initialized"
        );
        Ok(info)
    })
}

/// Whether this build can open encrypted archives
pub fn encryption_available() -> bool {
    cfg!(feature = "encryption")
}

fn open_flags(mode: OpenMode) -> OpenFlags {
    let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let table = [
        (OpenMode::READ_ONLY, OpenFlags::SQLITE_OPEN_READ_ONLY),
        (OpenMode::READ_WRITE, OpenFlags::SQLITE_OPEN_READ_WRITE),
        (OpenMode::CREATE, OpenFlags::SQLITE_OPEN_CREATE),
        (OpenMode::URI, OpenFlags::SQLITE_OPEN_URI),
        (OpenMode::MEMORY, OpenFlags::SQLITE_OPEN_MEMORY),
    ];
    for (mode_flag, backend_flag) in table {
        if mode.contains(mode_flag) {
            flags |= backend_flag;
        }
    }
    flags
}

/// Open a raw backend connection.
///
/// No setup is performed beyond the busy timeout; see [`configure_connection`].
pub fn open_connection(
    path: &Path,
    mode: OpenMode,
    busy_timeout: Duration,
) -> rusqlite::Result<Connection> {
    let conn = Connection::open_with_flags(path, open_flags(mode))?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

#[derive(Debug, Clone, Copy)]
enum KeyOp {
    Key,
    Rekey,
}

/// Apply `key` to a freshly opened connection.
///
/// An empty key means the archive is not encrypted and is a no-op. The key
/// is opaque bytes and is handed to the backend verbatim.
pub fn apply_key(conn: &Connection, key: &[u8]) -> PackResult<()> {
    if key.is_empty() {
        return Ok(());
    }
    set_key(conn, KeyOp::Key, key)
}

/// Change the key of an open archive; an empty key removes encryption.
pub fn rekey_connection(conn: &Connection, key: &[u8]) -> PackResult<()> {
    set_key(conn, KeyOp::Rekey, key)
}

#[cfg(feature = "encryption")]
fn set_key(conn: &Connection, op: KeyOp, key: &[u8]) -> PackResult<()> {
    use std::ffi::{c_char, c_int, c_void};

    let len = c_int::try_from(key.len())
        .map_err(|_| PackError::invalid_input("key is too long"))?;
    let schema = b"main\0".as_ptr().cast::<c_char>();
    // SAFETY: the handle is live for as long as `conn` is borrowed, `schema`
    // is NUL-terminated and `key` points at `len` readable bytes.
    let rc = unsafe {
        let db = conn.handle();
        let data = key.as_ptr().cast::<c_void>();
        match op {
            KeyOp::Key => ffi::sqlite3_key_v2(db, schema, data, len),
            KeyOp::Rekey => ffi::sqlite3_rekey_v2(db, schema, data, len),
        }
    };
    if rc != ffi::SQLITE_OK {
        let source = rusqlite::Error::SqliteFailure(ffi::Error::new(rc), None);
        return Err(PackError::setup(SetupStep::Key, source));
    }
    debug!(target: "sqlpack::backend", ?op, "Key applied");
    Ok(())
}

#[cfg(not(feature = "encryption"))]
fn set_key(_conn: &Connection, op: KeyOp, key: &[u8]) -> PackResult<()> {
    if key.is_empty() {
        return Ok(());
    }
    debug!(target: "sqlpack::backend", ?op, "Key supplied to a build without encryption");
    Err(PackError::EncryptionUnavailable)
}

/// Run the mandatory setup steps on a fresh connection.
///
/// Read-only connections skip journaling and schema creation: they cannot
/// write and rely on the archive having been created by a writer.
pub fn configure_connection(conn: &Connection, key: &[u8], read_only: bool) -> PackResult<()> {
    apply_key(conn, key)?;

    if !read_only {
        let mode: String = conn
            .query_row("pragma journal_mode=wal", [], |row| row.get(0))
            .map_err(|e| PackError::setup(SetupStep::JournalMode, e))?;
        debug!(target: "sqlpack::backend", journal_mode = %mode, "Journaling mode set");

        let schema = format!(
            "create table if not exists {table}({name} primary key not null unique, {data});\
             create unique index if not exists {index} on {table}({name});",
            table = ENTRIES_TABLE,
            name = ENTRIES_NAME_COLUMN,
            data = ENTRIES_DATA_COLUMN,
            index = ENTRIES_INDEX,
        );
        conn.execute_batch(&schema)
            .map_err(|e| PackError::setup(SetupStep::Schema, e))?;
    }

    conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DEFENSIVE, true)
        .map_err(|e| PackError::setup(SetupStep::Defensive, e))?;

    register_regexp(conn).map_err(|e| PackError::setup(SetupStep::RegexpPredicate, e))?;
    Ok(())
}
