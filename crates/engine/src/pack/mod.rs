//! Archive handle and open/close logic
//!
//! A [`Pack`] owns at most one backend connection to one archive file. It
//! composes the storage layer:
//! - connection setup on open/create
//! - the busy-retry driver for every statement
//! - blob streams for incremental I/O
//!
//! ## Borrowing model
//!
//! Entry operations take `&self`; lifecycle operations (`open`, `create`,
//! `close`, `rekey`) take `&mut self`. A [`BlobStream`](sqlpack_storage::BlobStream)
//! or prepared statement borrows the handle, so it is impossible to close
//! the archive while one is alive.
//!
//! ## Snapshots
//!
//! `make_immutable` works on `Rc<Pack>`: the snapshot holds a strong
//! reference to its origin for as long as it lives. The handle is
//! single-threaded; sharing across threads needs external synchronization.

pub mod config;
mod entries;
mod import;
mod search;
mod snapshot;

pub use config::{PackConfig, CONFIG_FILE_NAME};

use rusqlite::{Connection, Params, Row};
use sqlpack_core::{OpenMode, PackError, PackResult};
use sqlpack_storage::{
    configure_connection, execute_with_retry, init_backend, open_connection, query_with_retry,
    rekey_connection,
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, warn};

// ============================================================================
// Pack Struct
// ============================================================================

/// Handle to one single-file archive
///
/// Create a closed handle with [`Pack::new`], then call [`Pack::create`] or
/// [`Pack::open`].
///
/// # Example
///
/// ```
/// use sqlpack_engine::Pack;
///
/// # fn main() -> sqlpack_engine::PackResult<()> {
/// let dir = tempfile::tempdir()?;
/// let mut pack = Pack::new();
/// assert!(pack.create(dir.path().join("a.pack"), b"")?);
/// assert!(pack.add_memory("notes.txt", b"hello", false)?);
/// assert_eq!(pack.read_file("notes.txt", 0, 5)?, b"hello");
/// # Ok(())
/// # }
/// ```
pub struct Pack {
    /// Backend connection (None while closed)
    conn: Option<Connection>,

    /// Resolved archive location; None for memory and temporary archives
    path: Option<PathBuf>,

    /// Key applied at open time (empty = not encrypted)
    key: Vec<u8>,

    /// Mode the connection was opened with
    mode: OpenMode,

    /// Chunking and retry settings
    config: PackConfig,

    /// Handle this snapshot was taken from
    origin: Option<Rc<Pack>>,
}

impl Default for Pack {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Pack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pack")
            .field("active", &self.is_active())
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("encrypted", &!self.key.is_empty())
            .field("immutable", &self.is_immutable())
            .finish()
    }
}

impl Pack {
    /// Closed handle with the default configuration
    pub fn new() -> Self {
        Self::with_config(PackConfig::default())
    }

    /// Closed handle with an explicit configuration
    pub fn with_config(config: PackConfig) -> Self {
        Pack {
            conn: None,
            path: None,
            key: Vec::new(),
            mode: OpenMode::empty(),
            config,
            origin: None,
        }
    }

    /// Configuration this handle was built with
    pub fn config(&self) -> &PackConfig {
        &self.config
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create (or open for writing) the archive at `path`.
    ///
    /// Returns `Ok(false)` if the backend cannot open the file. A failure in
    /// any post-open setup step is an error.
    pub fn create(&mut self, path: impl AsRef<Path>, key: &[u8]) -> PackResult<bool> {
        self.open(path, OpenMode::READ_WRITE | OpenMode::CREATE, key)
    }

    /// Open an existing archive read-only.
    pub fn open_existing(&mut self, path: impl AsRef<Path>, key: &[u8]) -> PackResult<bool> {
        self.open(path, OpenMode::READ_ONLY, key)
    }

    /// Open the archive at `path` with an explicit access mode.
    ///
    /// Any connection this handle already owns is closed first.
    pub fn open(&mut self, path: impl AsRef<Path>, mode: OpenMode, key: &[u8]) -> PackResult<bool> {
        self.config.validate()?;
        init_backend()?;
        let path = path.as_ref();

        if self.conn.is_some() && !self.close() {
            return Ok(false);
        }

        let conn = match open_connection(path, mode, self.config.busy_timeout()) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(target: "sqlpack::pack", path = %path.display(), error = %e, "Could not open archive");
                return Ok(false);
            }
        };
        configure_connection(&conn, key, mode.is_read_only())?;

        self.path = canonical_path(path, mode);
        self.key = key.to_vec();
        self.mode = mode;
        self.conn = Some(conn);
        info!(
            target: "sqlpack::pack",
            path = %path.display(),
            mode = mode.bits(),
            encrypted = !key.is_empty(),
            "Archive opened"
        );
        Ok(true)
    }

    /// Close the backend connection.
    ///
    /// Returns `false` if the backend refused to close; the handle then stays
    /// open. Closing a closed handle succeeds.
    pub fn close(&mut self) -> bool {
        let Some(conn) = self.conn.take() else {
            return true;
        };
        match conn.close() {
            Ok(()) => {
                info!(target: "sqlpack::pack", path = ?self.path, "Archive closed");
                self.path = None;
                self.key.clear();
                self.mode = OpenMode::empty();
                true
            }
            Err((conn, e)) => {
                warn!(target: "sqlpack::pack", error = %e, "Could not close archive");
                self.conn = Some(conn);
                false
            }
        }
    }

    /// Re-encrypt the archive with `key`.
    ///
    /// Returns `Ok(false)` if the backend rejects the new key.
    pub fn rekey(&mut self, key: &[u8]) -> PackResult<bool> {
        let conn = self.conn()?;
        match rekey_connection(conn, key) {
            Ok(()) => {
                self.key = key.to_vec();
                info!(target: "sqlpack::pack", encrypted = !key.is_empty(), "Archive rekeyed");
                Ok(true)
            }
            Err(e) if e.is_backend() => {
                warn!(target: "sqlpack::pack", error = %e, "Rekey failed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether the handle owns an open connection
    pub fn is_active(&self) -> bool {
        self.conn.is_some()
    }

    /// Canonical path of the archive, if file-backed and open
    pub fn pack_name(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Key the archive was opened with
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Mode the archive was opened with
    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    // ========================================================================
    // Statement plumbing
    // ========================================================================

    pub(crate) fn conn(&self) -> PackResult<&Connection> {
        self.conn.as_ref().ok_or(PackError::NotOpen)
    }

    pub(crate) fn query<T, P, F>(&self, sql: &str, params: P, map: F) -> PackResult<Vec<T>>
    where
        P: Params + Copy,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        query_with_retry(conn, &mut stmt, params, &self.config.retry, map)
    }

    pub(crate) fn query_one<T, P, F>(&self, sql: &str, params: P, map: F) -> PackResult<Option<T>>
    where
        P: Params + Copy,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        Ok(self.query(sql, params, map)?.into_iter().next())
    }

    pub(crate) fn execute<P>(&self, sql: &str, params: P) -> PackResult<usize>
    where
        P: Params + Copy,
    {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let changed = execute_with_retry(conn, &mut stmt, params, &self.config.retry)?;
        debug!(target: "sqlpack::pack", sql, changed, "Statement executed");
        Ok(changed)
    }
}

/// Resolve the location a snapshot can reopen, if there is one.
fn canonical_path(path: &Path, mode: OpenMode) -> Option<PathBuf> {
    if mode.contains(OpenMode::MEMORY) {
        return None;
    }
    let text = path.to_string_lossy();
    if text.is_empty() || text == ":memory:" || text.starts_with("file::memory:") {
        return None;
    }
    if mode.contains(OpenMode::URI) {
        if let Some(rest) = text.strip_prefix("file:") {
            if rest.contains("mode=memory") {
                return None;
            }
            let file = rest.split('?').next().unwrap_or_default();
            return std::fs::canonicalize(file).ok();
        }
    }
    std::fs::canonicalize(path).ok()
}
