//! Seekable, buffered view over one entry's blob
//!
//! A `BlobStream` keeps two independent cursors: one for reading and one for
//! writing. Reads are served from a chunk-sized read-ahead buffer; writes are
//! coalesced in a chunk-sized pending buffer.
//!
//! Buffer coherence:
//! - pending writes are flushed before every read and every seek
//! - a flush invalidates the read buffer
//! - drop flushes
//!
//! The blob's length is fixed when the entry is allocated. Reads and writes
//! are clamped to it; at or past the end they transfer zero bytes.

use rusqlite::blob::Blob;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::{trace, warn};

/// Buffered bidirectional stream over a fixed-length blob
///
/// The stream borrows the connection that opened the blob, so the owning
/// archive cannot be closed while a stream is alive.
pub struct BlobStream<'conn> {
    blob: Blob<'conn>,
    read_only: bool,
    chunk_size: usize,
    len: usize,
    read_pos: usize,
    write_pos: usize,
    rbuf: Vec<u8>,
    rbuf_start: usize,
    wbuf: Vec<u8>,
    wbuf_start: usize,
}

fn backend_io(e: rusqlite::Error) -> io::Error {
    io::Error::other(e)
}

impl<'conn> BlobStream<'conn> {
    /// Wrap an open blob handle.
    ///
    /// `chunk_size` bounds both buffers; zero is treated as one.
    pub fn new(blob: Blob<'conn>, read_only: bool, chunk_size: usize) -> Self {
        let len = blob.len();
        let chunk_size = chunk_size.max(1);
        trace!(target: "sqlpack::stream", len, read_only, chunk_size, "Blob stream opened");
        BlobStream {
            blob,
            read_only,
            chunk_size,
            len,
            read_pos: 0,
            write_pos: 0,
            rbuf: Vec::new(),
            rbuf_start: 0,
            wbuf: Vec::with_capacity(if read_only { 0 } else { chunk_size }),
            wbuf_start: 0,
        }
    }

    /// Fixed length of the underlying blob
    pub fn len(&self) -> u64 {
        self.len as u64
    }

    /// Whether the blob has zero length
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether writes are rejected
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Current read cursor
    pub fn read_position(&self) -> u64 {
        self.read_pos as u64
    }

    /// Current write cursor
    pub fn write_position(&self) -> u64 {
        self.write_pos as u64
    }

    /// Move only the read cursor.
    pub fn seek_read(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.flush_pending()?;
        self.read_pos = self.resolve(pos, self.read_pos)?;
        Ok(self.read_pos as u64)
    }

    /// Move only the write cursor.
    pub fn seek_write(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.flush_pending()?;
        self.write_pos = self.resolve(pos, self.write_pos)?;
        Ok(self.write_pos as u64)
    }

    fn resolve(&self, pos: SeekFrom, current: usize) -> io::Result<usize> {
        let (base, delta) = match pos {
            SeekFrom::Start(n) => (0i128, n as i128),
            SeekFrom::End(d) => (self.len as i128, d as i128),
            SeekFrom::Current(d) => (current as i128, d as i128),
        };
        let target = base + delta;
        if target < 0 || target > self.len as i128 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to {target} outside blob of length {}", self.len),
            ));
        }
        Ok(target as usize)
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        if self.wbuf.is_empty() {
            return Ok(());
        }
        trace!(
            target: "sqlpack::stream",
            offset = self.wbuf_start,
            bytes = self.wbuf.len(),
            "Flushing pending writes"
        );
        self.blob
            .write_at(&self.wbuf, self.wbuf_start)
            .map_err(backend_io)?;
        self.wbuf.clear();
        self.rbuf.clear();
        Ok(())
    }

    fn buffered_read(&self, out: &mut [u8]) -> Option<usize> {
        let end = self.rbuf_start + self.rbuf.len();
        if self.rbuf.is_empty() || self.read_pos < self.rbuf_start || self.read_pos >= end {
            return None;
        }
        let from = self.read_pos - self.rbuf_start;
        let n = out.len().min(self.rbuf.len() - from);
        out[..n].copy_from_slice(&self.rbuf[from..from + n]);
        Some(n)
    }
}

impl Read for BlobStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.flush_pending()?;
        if self.read_pos >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(self.len - self.read_pos);
        let out = &mut buf[..want];

        let n = match self.buffered_read(out) {
            Some(n) => n,
            None if want >= self.chunk_size => {
                self.blob.read_at(out, self.read_pos).map_err(backend_io)?
            }
            None => {
                let fill = self.chunk_size.min(self.len - self.read_pos);
                self.rbuf.resize(fill, 0);
                let got = self
                    .blob
                    .read_at(&mut self.rbuf, self.read_pos)
                    .map_err(backend_io)?;
                self.rbuf.truncate(got);
                self.rbuf_start = self.read_pos;
                self.buffered_read(out).unwrap_or(0)
            }
        };
        self.read_pos += n;
        Ok(n)
    }
}

impl Write for BlobStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.read_only {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "blob stream is read-only",
            ));
        }
        if self.write_pos >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(self.len - self.write_pos);
        let data = &buf[..n];

        if !self.wbuf.is_empty() && self.write_pos != self.wbuf_start + self.wbuf.len() {
            self.flush_pending()?;
        }

        let written = if self.wbuf.is_empty() && n >= self.chunk_size {
            self.blob
                .write_at(data, self.write_pos)
                .map_err(backend_io)?;
            self.rbuf.clear();
            n
        } else {
            if self.wbuf.is_empty() {
                self.wbuf_start = self.write_pos;
            }
            let take = n.min(self.chunk_size - self.wbuf.len());
            self.wbuf.extend_from_slice(&data[..take]);
            if self.wbuf.len() == self.chunk_size {
                self.flush_pending()?;
            }
            take
        };
        self.write_pos += written;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.flush_pending()
    }
}

impl Seek for BlobStream<'_> {
    /// Move both cursors, each relative to itself for `Current`.
    ///
    /// Neither cursor moves unless both targets are in range. Returns the
    /// new read position.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.flush_pending()?;
        let read_target = self.resolve(pos, self.read_pos)?;
        let write_target = self.resolve(pos, self.write_pos)?;
        self.read_pos = read_target;
        self.write_pos = write_target;
        Ok(read_target as u64)
    }
}

impl Drop for BlobStream<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.flush_pending() {
            warn!(target: "sqlpack::stream", error = %e, "Failed to flush blob stream on drop");
        }
    }
}

impl std::fmt::Debug for BlobStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStream")
            .field("len", &self.len)
            .field("read_only", &self.read_only)
            .field("read_pos", &self.read_pos)
            .field("write_pos", &self.write_pos)
            .field("pending", &self.wbuf.len())
            .finish()
    }
}
