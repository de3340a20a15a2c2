//! Storage layer for sqlpack
//!
//! This crate owns everything that talks to the backend directly:
//! - Backend: process-wide one-time initialization and per-connection setup
//!   (key, write-ahead journaling, schema, defensive mode, regexp predicate)
//! - Retry: the shared busy-retry driver every statement goes through
//! - BlobStream: seekable, buffered, bidirectional view over one entry's blob
//!
//! The archive handle in `sqlpack-engine` composes these pieces.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod blob_stream;
pub mod regexp;
pub mod retry;

pub use backend::{
    apply_key, configure_connection, encryption_available, init_backend, open_connection,
    rekey_connection, BackendInfo,
};
pub use blob_stream::BlobStream;
pub use regexp::register_regexp;
pub use retry::{
    commit_with_retry, execute_with_retry, query_with_retry, with_busy_retry, RetryConfig,
};
