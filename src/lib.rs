//! sqlpack - single-file archive engine
//!
//! sqlpack stores many named binary entries inside one transactional data
//! file. Entries can be read and written whole or through seekable streams,
//! searched by name, imported from disk in bulk and exported again.
//!
//! # Quick Start
//!
//! ```
//! use sqlpack::{FindMode, Pack};
//!
//! # fn main() -> sqlpack::PackResult<()> {
//! let dir = tempfile::tempdir()?;
//! let mut pack = Pack::new();
//! pack.create(dir.path().join("assets.pack"), b"")?;
//!
//! pack.add_memory("docs/readme.txt", b"hello", false)?;
//! assert_eq!(pack.find("docs/%", FindMode::Like)?, vec!["docs/readme.txt"]);
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! The archive handle lives in `sqlpack-engine` and is re-exported here.
//! Backend setup, the busy-retry driver and blob streams live in
//! `sqlpack-storage`; shared types and errors in `sqlpack-core`.

pub use sqlpack_engine::*;
