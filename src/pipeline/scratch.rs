//! Per-run scratch directory.
//!
//! Every clip the pool renders lands in a [`ScratchDir`].  The directory and
//! everything in it is removed when the value is dropped, on success, error,
//! cancellation or unwind alike.  Removal failures are logged and swallowed.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

const PREFIX: &str = "narration-";

#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl ScratchDir {
    /// Create a fresh directory under the system temp dir.
    pub fn new() -> io::Result<Self> {
        tempfile::Builder::new().prefix(PREFIX).tempdir().map(Self::wrap)
    }

    /// Create a fresh directory under `parent`.
    pub fn new_in(parent: &Path) -> io::Result<Self> {
        tempfile::Builder::new()
            .prefix(PREFIX)
            .tempdir_in(parent)
            .map(Self::wrap)
    }

    fn wrap(dir: TempDir) -> Self {
        let path = dir.path().to_path_buf();
        log::debug!("pipeline: scratch dir {}", path.display());
        Self {
            dir: Some(dir),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        match dir.close() {
            Ok(()) => log::debug!("pipeline: removed scratch dir {}", self.path.display()),
            Err(e) => log::warn!(
                "pipeline: could not remove scratch dir {}: {e}",
                self.path.display()
            ),
        }
    }
}
