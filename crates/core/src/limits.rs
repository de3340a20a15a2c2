//! Size limits and fixed names of the archive layout
//!
//! The persisted layout is one table of (unique text key, blob) plus a
//! uniqueness index on the key. Every statement issued by the engine refers
//! to these names; arbitrary other tables stay reachable through raw `exec`.

/// Table holding one row per entry
pub const ENTRIES_TABLE: &str = "pack_files";

/// Entry name column (unique, non-null)
pub const ENTRIES_NAME_COLUMN: &str = "file_name";

/// Entry bytes column
pub const ENTRIES_DATA_COLUMN: &str = "data";

/// Unique index on the entry name column
pub const ENTRIES_INDEX: &str = "pack_files_index";

/// Maximum length of a single blob in bytes.
///
/// Mirrors the backend's compile-time `SQLITE_MAX_LENGTH` default. Sources
/// larger than this are rejected before any statement is issued.
pub const MAX_BLOB_LENGTH: u64 = 1_000_000_000;

/// Default chunk size for streaming import/export and the blob stream buffer
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Text substituted for NULL columns in `exec` results
pub const NULL_MARKER: &str = "NULL";
