//! Integration tests for the storage layer
//!
//! These tests run real connections against a file-backed archive:
//! - Busy-retry behavior under a competing writer
//! - Blob streams over entries created through the configured schema
//! - Setup steps on read-only connections

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use rusqlite::blob::ZeroBlob;
use rusqlite::{params, Connection, DatabaseName};
use sqlpack_core::{OpenMode, ENTRIES_DATA_COLUMN, ENTRIES_TABLE};
use sqlpack_storage::{
    commit_with_retry, configure_connection, execute_with_retry, init_backend, open_connection,
    query_with_retry, BlobStream, RetryConfig,
};
use tempfile::TempDir;

// ============================================================================
// Helper Functions
// ============================================================================

fn writer(path: &Path) -> Connection {
    init_backend().unwrap();
    let conn = open_connection(
        path,
        OpenMode::READ_WRITE | OpenMode::CREATE,
        Duration::ZERO,
    )
    .unwrap();
    configure_connection(&conn, b"", false).unwrap();
    conn
}

fn reader(path: &Path) -> Connection {
    let conn = open_connection(path, OpenMode::READ_ONLY, Duration::ZERO).unwrap();
    configure_connection(&conn, b"", true).unwrap();
    conn
}

fn insert(conn: &Connection, name: &str, config: &RetryConfig) -> sqlpack_core::PackResult<usize> {
    let mut stmt = conn
        .prepare("insert into pack_files(file_name, data) values(?1, ?2)")
        .unwrap();
    execute_with_retry(conn, &mut stmt, params![name, b"payload".to_vec()], config)
}

/// Connection left in rollback-journal mode, where an open reader blocks a commit.
fn journaled(path: &Path) -> Connection {
    let conn = Connection::open(path).unwrap();
    conn.busy_timeout(Duration::ZERO).unwrap();
    conn.execute_batch("create table if not exists t(x)").unwrap();
    conn
}

fn count(conn: &Connection) -> i64 {
    conn.query_row("select count(*) from pack_files", [], |r| r.get(0))
        .unwrap()
}

// ============================================================================
// Busy Retry
// ============================================================================

mod busy_retry {
    use super::*;

    #[test]
    fn test_bounded_retry_surfaces_busy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("busy.pack");
        let a = writer(&path);
        let b = writer(&path);

        a.execute_batch("begin immediate").unwrap();
        let err = insert(&b, "x", &RetryConfig::new().with_max_retries(3)).unwrap_err();
        assert!(err.is_busy());

        a.execute_batch("commit").unwrap();
        assert_eq!(insert(&b, "x", &RetryConfig::default()).unwrap(), 1);
    }

    #[test]
    fn test_busy_in_transaction_rolls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("txn.pack");
        let a = writer(&path);
        let b = writer(&path);

        b.execute_batch("begin").unwrap();
        assert_eq!(count(&b), 0);

        a.execute_batch("begin immediate").unwrap();
        assert!(insert(&b, "y", &RetryConfig::no_retry()).is_err());
        assert!(b.is_autocommit());
        a.execute_batch("rollback").unwrap();
    }

    #[test]
    fn test_unbounded_retry_waits_for_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wait.pack");
        let b = writer(&path);

        let (tx, rx) = mpsc::channel();
        let holder_path = path.clone();
        let holder = thread::spawn(move || {
            let a = writer(&holder_path);
            a.execute_batch("begin immediate").unwrap();
            a.execute(
                "insert into pack_files(file_name, data) values('held', x'00')",
                [],
            )
            .unwrap();
            tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(100));
            a.execute_batch("commit").unwrap();
        });

        rx.recv().unwrap();
        let config = RetryConfig::new().with_base_delay_ms(1).with_max_delay_ms(5);
        assert_eq!(insert(&b, "late", &config).unwrap(), 1);
        holder.join().unwrap();

        assert_eq!(count(&b), 2);
    }

    #[test]
    fn test_busy_commit_keeps_transaction_until_exhausted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("commit.db");
        let a = journaled(&path);
        let b = journaled(&path);

        a.execute_batch("begin").unwrap();
        let seen: i64 = a.query_row("select count(*) from t", [], |r| r.get(0)).unwrap();
        assert_eq!(seen, 0);

        b.execute_batch("begin immediate; insert into t values (1);").unwrap();
        let err = commit_with_retry(&b, &RetryConfig::new().with_max_retries(2)).unwrap_err();
        assert!(err.is_busy());
        assert!(b.is_autocommit());

        a.execute_batch("commit").unwrap();
        let rows: i64 = b.query_row("select count(*) from t", [], |r| r.get(0)).unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn test_busy_commit_is_reissued() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reissue.db");
        let b = journaled(&path);

        let (tx, rx) = mpsc::channel();
        let holder_path = path.clone();
        let holder = thread::spawn(move || {
            let a = journaled(&holder_path);
            a.execute_batch("begin").unwrap();
            let _: i64 = a.query_row("select count(*) from t", [], |r| r.get(0)).unwrap();
            tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(100));
            a.execute_batch("commit").unwrap();
        });

        rx.recv().unwrap();
        b.execute_batch("begin immediate; insert into t values (1);").unwrap();
        let config = RetryConfig::new().with_base_delay_ms(1).with_max_delay_ms(5);
        commit_with_retry(&b, &config).unwrap();
        holder.join().unwrap();

        assert!(b.is_autocommit());
        let rows: i64 = b.query_row("select count(*) from t", [], |r| r.get(0)).unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_readers_are_not_blocked_by_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.pack");
        let a = writer(&path);
        insert(&a, "visible", &RetryConfig::default()).unwrap();

        let r = reader(&path);
        a.execute_batch("begin immediate").unwrap();
        insert(&a, "pending", &RetryConfig::default()).unwrap();

        let mut stmt = r.prepare("select file_name from pack_files").unwrap();
        let names = query_with_retry(&r, &mut stmt, [], &RetryConfig::no_retry(), |row| {
            row.get::<_, String>(0)
        })
        .unwrap();
        assert_eq!(names, vec!["visible".to_string()]);
        a.execute_batch("commit").unwrap();
    }
}

// ============================================================================
// Blob Streams
// ============================================================================

mod blob_streams {
    use super::*;

    #[test]
    fn test_stream_over_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stream.pack");
        let conn = writer(&path);
        conn.execute(
            "insert into pack_files(file_name, data) values(?1, ?2)",
            params!["big.bin", ZeroBlob(10_000)],
        )
        .unwrap();
        let rowid = conn.last_insert_rowid();

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        {
            let blob = conn
                .blob_open(DatabaseName::Main, ENTRIES_TABLE, ENTRIES_DATA_COLUMN, rowid, false)
                .unwrap();
            let mut s = BlobStream::new(blob, false, 4096);
            s.write_all(&payload).unwrap();
        }

        let blob = conn
            .blob_open(DatabaseName::Main, ENTRIES_TABLE, ENTRIES_DATA_COLUMN, rowid, true)
            .unwrap();
        let mut s = BlobStream::new(blob, true, 4096);
        s.seek(SeekFrom::Start(5000)).unwrap();
        let mut tail = Vec::new();
        s.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, &payload[5000..]);
    }

    #[test]
    fn test_write_stream_holds_lock_from_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("locked.pack");
        let a = writer(&path);
        let b = writer(&path);
        a.execute(
            "insert into pack_files(file_name, data) values('w', ?1)",
            [ZeroBlob(64)],
        )
        .unwrap();
        let rowid = a.last_insert_rowid();

        {
            let blob = a
                .blob_open(DatabaseName::Main, ENTRIES_TABLE, ENTRIES_DATA_COLUMN, rowid, false)
                .unwrap();
            let mut s = BlobStream::new(blob, false, 16);
            assert!(insert(&b, "blocked", &RetryConfig::no_retry())
                .unwrap_err()
                .is_busy());
            s.write_all(&[9u8; 64]).unwrap();
            s.flush().unwrap();
        }

        assert_eq!(insert(&b, "after", &RetryConfig::no_retry()).unwrap(), 1);
    }

    #[test]
    fn test_read_stream_unaffected_by_other_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.pack");
        let a = writer(&path);
        a.execute(
            "insert into pack_files(file_name, data) values('r', ?1)",
            [b"abcdef".to_vec()],
        )
        .unwrap();
        let rowid = a.last_insert_rowid();

        let r = reader(&path);
        let blob = r
            .blob_open(DatabaseName::Main, ENTRIES_TABLE, ENTRIES_DATA_COLUMN, rowid, true)
            .unwrap();
        let mut s = BlobStream::new(blob, true, 2);
        let mut head = [0u8; 3];
        s.read_exact(&mut head).unwrap();

        insert(&a, "concurrent", &RetryConfig::no_retry()).unwrap();

        let mut rest = Vec::new();
        s.read_to_end(&mut rest).unwrap();
        assert_eq!(&head, b"abc");
        assert_eq!(rest, b"def");
    }

    #[test]
    fn test_small_chunks_match_large_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chunks.pack");
        let conn = writer(&path);
        conn.execute(
            "insert into pack_files(file_name, data) values('c', ?1)",
            [ZeroBlob(100)],
        )
        .unwrap();
        let rowid = conn.last_insert_rowid();
        let payload: Vec<u8> = (0..100u8).collect();

        {
            let blob = conn
                .blob_open(DatabaseName::Main, ENTRIES_TABLE, ENTRIES_DATA_COLUMN, rowid, false)
                .unwrap();
            let mut s = BlobStream::new(blob, false, 7);
            for piece in payload.chunks(3) {
                s.write_all(piece).unwrap();
            }
        }

        let stored: Vec<u8> = conn
            .query_row("select data from pack_files where rowid = ?1", [rowid], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(stored, payload);
    }
}

// ============================================================================
// Read-only Setup
// ============================================================================

mod read_only {
    use super::*;

    #[test]
    fn test_read_only_cannot_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.pack");
        drop(writer(&path));

        let r = reader(&path);
        assert!(insert(&r, "nope", &RetryConfig::default()).is_err());
    }
}
