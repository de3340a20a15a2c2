//! Core types for sqlpack archives
//!
//! This module defines the foundational types:
//! - OpenMode: access mode flags for opening an archive
//! - FindMode: how `find` matches entry names
//! - RowId: backend row identifier of an entry
//! - ExecRow: one row returned by a raw statement

use std::collections::BTreeMap;
use std::fmt;

bitflags::bitflags! {
    /// Access mode for opening an archive
    ///
    /// Flags compose with `|`:
    ///
    /// ```
    /// use sqlpack_core::OpenMode;
    ///
    /// let mode = OpenMode::READ_WRITE | OpenMode::CREATE;
    /// assert!(mode.contains(OpenMode::CREATE));
    /// assert!(!mode.is_read_only());
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenMode: u32 {
        /// Open for reading only
        const READ_ONLY = 0x01;
        /// Open for reading and writing
        const READ_WRITE = 0x02;
        /// Create the archive if it does not exist (requires `READ_WRITE`)
        const CREATE = 0x04;
        /// Interpret the path as a `file:` URI
        const URI = 0x08;
        /// Keep the archive purely in memory
        const MEMORY = 0x10;
    }
}

impl OpenMode {
    /// Whether the handle opened with this mode cannot write
    pub fn is_read_only(self) -> bool {
        self.contains(OpenMode::READ_ONLY) && !self.contains(OpenMode::READ_WRITE)
    }
}

impl Default for OpenMode {
    fn default() -> Self {
        OpenMode::READ_ONLY
    }
}

/// Entry-name matching strategy used by `find`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FindMode {
    /// SQL `LIKE`: `%` and `_` wildcards, ASCII case-insensitive
    #[default]
    Like,
    /// `GLOB`: `*`, `?` and `[...]` wildcards, case-sensitive
    Glob,
    /// Regular expression evaluated by the registered predicate
    Regexp,
}

impl FindMode {
    /// Backend operator implementing this mode
    pub fn operator(self) -> &'static str {
        match self {
            FindMode::Like => "like",
            FindMode::Glob => "glob",
            FindMode::Regexp => "regexp",
        }
    }
}

/// Backend row identifier of an entry
///
/// Valid only until the entry is deleted or the archive is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(i64);

impl RowId {
    /// Wrap a raw row identifier
    pub const fn new(raw: i64) -> Self {
        RowId(raw)
    }

    /// Raw row identifier as understood by the backend
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for RowId {
    fn from(raw: i64) -> Self {
        RowId(raw)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One result row of a raw statement: column name to text value.
///
/// NULL columns carry [`crate::NULL_MARKER`].
pub type ExecRow = BTreeMap<String, String>;
