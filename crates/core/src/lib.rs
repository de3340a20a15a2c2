//! Core types and errors for sqlpack
//!
//! This crate defines the foundational types used throughout the workspace:
//! - PackError / PackResult: error taxonomy shared by storage and engine
//! - OpenMode: bitwise-composable access modes for opening an archive
//! - FindMode: closed set of entry-name matching strategies
//! - RowId: stable row identifier of an entry
//! - ExecRow: one result row of a raw statement
//! - Limits: entry size ceiling and chunking defaults

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod limits;
pub mod types;

pub use error::{PackError, PackResult, SetupStep};
pub use limits::{
    DEFAULT_CHUNK_SIZE, ENTRIES_DATA_COLUMN, ENTRIES_INDEX, ENTRIES_NAME_COLUMN, ENTRIES_TABLE,
    MAX_BLOB_LENGTH, NULL_MARKER,
};
pub use types::{ExecRow, FindMode, OpenMode, RowId};
