//! Immutable snapshots
//!
//! A snapshot is a second, read-only handle on the same file. It keeps its
//! origin alive through a strong reference but shares nothing else with it;
//! write-ahead journaling lets it read while the origin writes.

use super::Pack;
use sqlpack_core::{OpenMode, PackError, PackResult};
use std::rc::Rc;
use tracing::info;

impl Pack {
    /// Open a read-only handle on this archive's file.
    ///
    /// The snapshot uses the same key and configuration. Memory and
    /// temporary archives have no path to reopen and fail with
    /// [`PackError::NoCanonicalPath`].
    pub fn make_immutable(self: &Rc<Self>) -> PackResult<Rc<Pack>> {
        let path = self.path.clone().ok_or(PackError::NoCanonicalPath)?;
        let mut snapshot = Pack::with_config(self.config.clone());
        let opened = snapshot
            .open(&path, OpenMode::READ_ONLY, &self.key)
            .map_err(|e| PackError::SnapshotOpen(format!("{}: {}", path.display(), e)))?;
        if !opened {
            return Err(PackError::SnapshotOpen(path.display().to_string()));
        }
        snapshot.origin = Some(Rc::clone(self));
        info!(target: "sqlpack::pack", path = %path.display(), "Immutable snapshot opened");
        Ok(Rc::new(snapshot))
    }

    /// The mutable handle behind this one.
    ///
    /// For a snapshot this walks back to the handle it was taken from;
    /// otherwise it is this handle.
    pub fn get_mutable(self: &Rc<Self>) -> Rc<Pack> {
        match &self.origin {
            Some(origin) => origin.get_mutable(),
            None => Rc::clone(self),
        }
    }

    /// Whether this handle is a snapshot
    pub fn is_immutable(&self) -> bool {
        self.origin.is_some()
    }
}
