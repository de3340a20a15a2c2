//! Archive engine for sqlpack
//!
//! This crate provides the archive handle, [`Pack`], on top of the storage
//! layer:
//! - Lifecycle: create, open, close, rekey
//! - Entries: add (memory, file, stream, directory), allocate, read,
//!   extract, rename, delete, list
//! - Search: LIKE, GLOB and regular-expression name matching; raw statements
//! - Snapshots: read-only handles that keep their origin alive
//!
//! Configuration is loaded from `sqlpack.toml` via [`PackConfig`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod pack;

pub use pack::{Pack, PackConfig, CONFIG_FILE_NAME};
pub use sqlpack_core::{
    ExecRow, FindMode, OpenMode, PackError, PackResult, RowId, DEFAULT_CHUNK_SIZE,
    MAX_BLOB_LENGTH, NULL_MARKER,
};
pub use sqlpack_storage::{encryption_available, init_backend, BackendInfo, BlobStream, RetryConfig};
