//! Entry metadata, reads, deletion and streams

use super::Pack;
use rusqlite::{params, DatabaseName};
use sqlpack_core::{PackError, PackResult, RowId, ENTRIES_DATA_COLUMN, ENTRIES_TABLE};
use sqlpack_storage::{with_busy_retry, BlobStream};
use tracing::debug;

impl Pack {
    /// Whether an entry named `name` exists
    pub fn file_exists(&self, name: &str) -> PackResult<bool> {
        let hit = self.query_one(
            "select 1 from pack_files where file_name = ?1 limit 1",
            params![name],
            |_| Ok(()),
        )?;
        Ok(hit.is_some())
    }

    /// Size in bytes of the entry, or 0 if it does not exist
    pub fn get_file_size(&self, name: &str) -> PackResult<u64> {
        Ok(self.locate(name)?.map_or(0, |(_, size)| size))
    }

    /// Row identifier of the entry, if it exists
    pub fn get_row_id(&self, name: &str) -> PackResult<Option<RowId>> {
        Ok(self.locate(name)?.map(|(row, _)| row))
    }

    /// Name of the entry stored at `row`
    pub fn get_file_name(&self, row: RowId) -> PackResult<Option<String>> {
        self.query_one(
            "select file_name from pack_files where rowid = ?1",
            params![row.as_i64()],
            |r| r.get(0),
        )
    }

    /// Every entry name, in insertion order
    pub fn list_files(&self) -> PackResult<Vec<String>> {
        self.query(
            "select file_name from pack_files order by rowid",
            params![],
            |r| r.get(0),
        )
    }

    /// Number of entries
    pub fn get_file_count(&self) -> PackResult<u64> {
        let count: Option<i64> =
            self.query_one("select count(*) from pack_files", params![], |r| r.get(0))?;
        Ok(count.unwrap_or(0) as u64)
    }

    /// Sum of all entry sizes in bytes
    pub fn size(&self) -> PackResult<u64> {
        let total: Option<i64> = self.query_one(
            "select coalesce(sum(length(data)), 0) from pack_files",
            params![],
            |r| r.get(0),
        )?;
        Ok(total.unwrap_or(0) as u64)
    }

    /// Remove an entry. Returns `false` if it did not exist.
    pub fn delete_file(&self, name: &str) -> PackResult<bool> {
        let changed = self.execute("delete from pack_files where file_name = ?1", params![name])?;
        Ok(changed > 0)
    }

    /// Rename an entry. Returns `false` if `old` does not exist.
    ///
    /// Renaming onto an existing name is a backend error.
    pub fn rename_file(&self, old: &str, new: &str) -> PackResult<bool> {
        let changed = self.execute(
            "update pack_files set file_name = ?1 where file_name = ?2",
            params![new, old],
        )?;
        Ok(changed > 0)
    }

    /// Delete every entry, returning how many were removed
    pub fn clear(&self) -> PackResult<usize> {
        self.execute("delete from pack_files", params![])
    }

    /// Read `length` bytes at `offset`.
    ///
    /// Returns an empty vector if the entry is missing or the range does not
    /// fit inside it.
    pub fn read_file(&self, name: &str, offset: u64, length: usize) -> PackResult<Vec<u8>> {
        let Some((row, size)) = self.locate(name)? else {
            return Ok(Vec::new());
        };
        if !range_fits(offset, length, size) {
            return Ok(Vec::new());
        }
        let mut buf = vec![0u8; length];
        self.read_row_at(row, offset, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` from `offset`; returns the bytes read (0 when out of range).
    pub fn read_file_into(&self, name: &str, offset: u64, buf: &mut [u8]) -> PackResult<usize> {
        let Some((row, size)) = self.locate(name)? else {
            return Ok(0);
        };
        if !range_fits(offset, buf.len(), size) {
            return Ok(0);
        }
        self.read_row_at(row, offset, buf)?;
        Ok(buf.len())
    }

    fn read_row_at(&self, row: RowId, offset: u64, buf: &mut [u8]) -> PackResult<()> {
        let conn = self.conn()?;
        let blob = with_busy_retry(conn, &self.config.retry, || {
            conn.blob_open(DatabaseName::Main, ENTRIES_TABLE, ENTRIES_DATA_COLUMN, row.as_i64(), true)
        })?;
        blob.read_at_exact(buf, offset as usize)?;
        Ok(())
    }

    /// Open a stream over an entry. Missing entries are an error.
    pub fn open_file(&self, name: &str, read_write: bool) -> PackResult<BlobStream<'_>> {
        let row = self
            .get_row_id(name)?
            .ok_or_else(|| PackError::not_found(name))?;
        self.open_row(row, read_write)
    }

    /// Open a stream over the entry at `row`.
    pub fn open_row(&self, row: RowId, read_write: bool) -> PackResult<BlobStream<'_>> {
        let conn = self.conn()?;
        let blob = with_busy_retry(conn, &self.config.retry, || {
            conn.blob_open(
                DatabaseName::Main,
                ENTRIES_TABLE,
                ENTRIES_DATA_COLUMN,
                row.as_i64(),
                !read_write,
            )
        })?;
        Ok(BlobStream::new(blob, !read_write, self.config.chunk_size))
    }

    /// Read-only stream over an entry, or `None` if it cannot be opened.
    pub fn get_file(&self, name: &str) -> Option<BlobStream<'_>> {
        match self.open_file(name, false) {
            Ok(stream) => Some(stream),
            Err(e) => {
                debug!(target: "sqlpack::pack", name, error = %e, "Entry stream unavailable");
                None
            }
        }
    }

    pub(crate) fn locate(&self, name: &str) -> PackResult<Option<(RowId, u64)>> {
        self.query_one(
            "select rowid, length(data) from pack_files where file_name = ?1",
            params![name],
            |r| Ok((RowId::new(r.get(0)?), r.get::<_, i64>(1)? as u64)),
        )
    }
}

/// Whether `length` bytes at `offset` lie inside an entry of `size` bytes.
fn range_fits(offset: u64, length: usize, size: u64) -> bool {
    length > 0
        && offset < size
        && u64::try_from(length)
            .ok()
            .and_then(|len| offset.checked_add(len))
            .is_some_and(|end| end <= size)
}
