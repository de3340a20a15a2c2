//! Shared test utilities for the end-to-end suites.
//!
//! Import via `mod common;` from any top-level test file.

#![allow(dead_code)]

use sqlpack::{Pack, PackConfig};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Once;
use tempfile::TempDir;

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output to the test harness.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

// ============================================================================
// TestPack - archive in a private temp directory
// ============================================================================

/// An open archive plus the temp directory that backs it.
///
/// Field order matters: the handle is dropped before the directory.
pub struct TestPack {
    pub pack: Pack,
    pub dir: TempDir,
}

impl TestPack {
    /// Fresh archive with the default configuration.
    pub fn new() -> Self {
        Self::with_config(PackConfig::default())
    }

    /// Fresh archive with an explicit configuration.
    pub fn with_config(config: PackConfig) -> Self {
        init_tracing();
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut pack = Pack::with_config(config);
        let opened = pack
            .create(dir.path().join("test.pack"), b"")
            .expect("Failed to set up archive");
        assert!(opened, "Failed to create archive");
        TestPack { pack, dir }
    }

    /// Path of the archive file.
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("test.pack")
    }

    /// Write a file inside the temp directory and return its path.
    pub fn write_source(&self, rel: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join("sources").join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create source dir");
        }
        std::fs::write(&path, contents).expect("Failed to write source file");
        path
    }

    /// Consume into a shared handle for snapshot tests.
    pub fn into_shared(self) -> (Rc<Pack>, TempDir) {
        (Rc::new(self.pack), self.dir)
    }
}

/// Entry name used for a file found by directory import.
pub fn entry_name(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
