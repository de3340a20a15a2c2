//! Import into and export out of the archive
//!
//! Large payloads never pass through memory whole: `add_file` and
//! `add_stream` insert a zero-filled placeholder of the final size and then
//! copy the source into the blob chunk by chunk. `extract_file` does the
//! reverse into a temporary file that is only moved into place once
//! complete.

use super::Pack;
use rusqlite::blob::ZeroBlob;
use rusqlite::{params, DatabaseName};
use sqlpack_core::{
    PackError, PackResult, RowId, ENTRIES_DATA_COLUMN, ENTRIES_TABLE, MAX_BLOB_LENGTH,
};
use sqlpack_storage::{commit_with_retry, with_busy_retry};
use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

impl Pack {
    /// Store `bytes` as entry `name`.
    ///
    /// Returns `false` for an empty or oversized payload, or when the name is
    /// taken and `allow_replace` is not set.
    pub fn add_memory(&self, name: &str, bytes: &[u8], allow_replace: bool) -> PackResult<bool> {
        if bytes.is_empty() || bytes.len() as u64 > MAX_BLOB_LENGTH {
            return Ok(false);
        }
        if !self.claim_name(name, allow_replace)? {
            return Ok(false);
        }
        self.execute(
            "insert into pack_files(file_name, data) values(?1, ?2)",
            params![name, bytes],
        )?;
        Ok(true)
    }

    /// Import the file at `disk_path` as entry `name`.
    pub fn add_file(
        &self,
        disk_path: impl AsRef<Path>,
        name: &str,
        allow_replace: bool,
    ) -> PackResult<bool> {
        let disk_path = disk_path.as_ref();
        let size = match fs::metadata(disk_path) {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Ok(false),
        };
        if size > MAX_BLOB_LENGTH {
            return Ok(false);
        }
        let file = match File::open(disk_path) {
            Ok(file) => file,
            Err(e) => {
                debug!(target: "sqlpack::pack", path = %disk_path.display(), error = %e, "Source not readable");
                return Ok(false);
            }
        };
        if !self.claim_name(name, allow_replace)? {
            return Ok(false);
        }
        self.import_sized(name, &mut BufReader::new(file), size)?;
        Ok(true)
    }

    /// Import everything from the stream's current position to its end.
    pub fn add_stream<R>(&self, name: &str, source: &mut R, allow_replace: bool) -> PackResult<bool>
    where
        R: Read + Seek,
    {
        let start = source.stream_position()?;
        let end = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(start))?;
        let size = end.saturating_sub(start);
        if size > MAX_BLOB_LENGTH {
            return Ok(false);
        }
        if !self.claim_name(name, allow_replace)? {
            return Ok(false);
        }
        self.import_sized(name, source, size)?;
        Ok(true)
    }

    /// Create a zero-filled entry of exactly `size` bytes for later streamed writes.
    pub fn allocate_file(&self, name: &str, size: u64, allow_replace: bool) -> PackResult<RowId> {
        if size > MAX_BLOB_LENGTH {
            return Err(PackError::invalid_input(format!(
                "cannot allocate {} bytes; entries are limited to {}",
                size, MAX_BLOB_LENGTH
            )));
        }
        if !self.claim_name(name, allow_replace)? {
            return Err(PackError::AlreadyExists(name.to_string()));
        }
        self.insert_placeholder(name, size)
    }

    /// Import every regular file under `root` in one transaction.
    ///
    /// Entry names are the file paths as found under `root` with `/` as the
    /// separator. If any file cannot be imported nothing from this call is
    /// kept and the result is `false`.
    pub fn add_directory(&self, root: impl AsRef<Path>, allow_replace: bool) -> PackResult<bool> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Ok(false);
        }
        let mut files = Vec::new();
        if let Err(e) = collect_files(root, &mut files) {
            warn!(target: "sqlpack::pack", root = %root.display(), error = %e, "Could not walk directory");
            return Ok(false);
        }

        let conn = self.conn()?;
        with_busy_retry(conn, &self.config.retry, || conn.execute_batch("begin immediate"))?;

        let mut outcome = Ok(true);
        for path in &files {
            let name = path.to_string_lossy().replace('\\', "/");
            match self.add_file(path, &name, allow_replace) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(target: "sqlpack::pack", name = %name, "Directory import rejected a file");
                    outcome = Ok(false);
                    break;
                }
                Err(e) => {
                    warn!(target: "sqlpack::pack", name = %name, error = %e, "Directory import failed");
                    outcome = Err(e);
                    break;
                }
            }
        }

        match outcome {
            Ok(true) => {
                commit_with_retry(conn, &self.config.retry)?;
                info!(target: "sqlpack::pack", root = %root.display(), files = files.len(), "Directory imported");
                Ok(true)
            }
            _ => {
                if !conn.is_autocommit() {
                    conn.execute_batch("rollback")?;
                }
                Ok(false)
            }
        }
    }

    /// Write entry `name` to `disk_path`.
    ///
    /// Returns `false` if the entry does not exist or the destination cannot
    /// be written. The destination only appears once fully written.
    pub fn extract_file(&self, name: &str, disk_path: impl AsRef<Path>) -> PackResult<bool> {
        let disk_path = disk_path.as_ref();
        let Some((row, size)) = self.locate(name)? else {
            return Ok(false);
        };
        let dir = match disk_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = match NamedTempFile::new_in(&dir) {
            Ok(tmp) => tmp,
            Err(e) => {
                debug!(target: "sqlpack::pack", dir = %dir.display(), error = %e, "Destination not writable");
                return Ok(false);
            }
        };

        let conn = self.conn()?;
        let blob = with_busy_retry(conn, &self.config.retry, || {
            conn.blob_open(DatabaseName::Main, ENTRIES_TABLE, ENTRIES_DATA_COLUMN, row.as_i64(), true)
        })?;
        let mut buf = vec![0u8; self.config.chunk_size];
        let mut offset = 0u64;
        while offset < size {
            let remaining = size
                .checked_sub(offset)
                .ok_or_else(|| PackError::invariant("negative remaining length during extraction"))?;
            let n = (remaining as usize).min(buf.len());
            blob.read_at_exact(&mut buf[..n], offset as usize)?;
            if let Err(e) = tmp.write_all(&buf[..n]) {
                debug!(target: "sqlpack::pack", error = %e, "Write to destination failed");
                return Ok(false);
            }
            offset += n as u64;
        }
        if let Err(e) = tmp.flush() {
            debug!(target: "sqlpack::pack", error = %e, "Flush of destination failed");
            return Ok(false);
        }
        match tmp.persist(disk_path) {
            Ok(_) => Ok(true),
            Err(e) => {
                debug!(target: "sqlpack::pack", path = %disk_path.display(), error = %e.error, "Could not move extracted file into place");
                Ok(false)
            }
        }
    }

    /// Make `name` available: free, or freed because replacement is allowed.
    fn claim_name(&self, name: &str, allow_replace: bool) -> PackResult<bool> {
        if !self.file_exists(name)? {
            return Ok(true);
        }
        if !allow_replace {
            return Ok(false);
        }
        self.delete_file(name)?;
        Ok(true)
    }

    fn insert_placeholder(&self, name: &str, size: u64) -> PackResult<RowId> {
        // MAX_BLOB_LENGTH fits in i32
        let zeroed = ZeroBlob(size as i32);
        self.execute(
            "insert into pack_files(file_name, data) values(?1, ?2)",
            params![name, zeroed],
        )?;
        Ok(RowId::new(self.conn()?.last_insert_rowid()))
    }

    fn import_sized<R: Read>(&self, name: &str, source: &mut R, size: u64) -> PackResult<()> {
        let row = self.insert_placeholder(name, size)?;
        if let Err(e) = self.copy_into(row, source, size) {
            warn!(target: "sqlpack::pack", name, error = %e, "Chunked import failed, removing placeholder");
            self.execute("delete from pack_files where rowid = ?1", params![row.as_i64()])?;
            return Err(e);
        }
        Ok(())
    }

    fn copy_into<R: Read>(&self, row: RowId, source: &mut R, size: u64) -> PackResult<()> {
        if size == 0 {
            return Ok(());
        }
        let conn = self.conn()?;
        let mut blob = with_busy_retry(conn, &self.config.retry, || {
            conn.blob_open(DatabaseName::Main, ENTRIES_TABLE, ENTRIES_DATA_COLUMN, row.as_i64(), false)
        })?;
        let mut buf = vec![0u8; self.config.chunk_size];
        let mut offset = 0u64;
        while offset < size {
            let n = ((size - offset) as usize).min(buf.len());
            source.read_exact(&mut buf[..n])?;
            blob.write_at(&buf[..n], offset as usize)?;
            offset += n as u64;
        }
        Ok(())
    }
}

/// Regular files under `dir`, depth-first in name order.
///
/// Symbolic links to directories are not followed.
fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort();
    for path in entries {
        let meta = fs::symlink_metadata(&path)?;
        if meta.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}
