//! Per-invocation staging area
//!
//! Every pipeline run materializes its objects under a directory of its
//! own, created fresh under the configured staging root. Two runs on the
//! same source key therefore never share a file. The directory is removed
//! when the [`StagingArea`] is dropped, on every exit path.

use std::{
    fmt::Debug,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

use crate::primitive::tracing::instrument;

/// Prefix of a transformed file's name, next to its source in the run
/// directory. Never part of a published key.
pub const TRANSFORM_MARKER: &str = "tmp_prew_";

/// Decide whether an object key (or bucket name) is a relative path made
/// of normal segments only.
///
/// Rejected:
/// - Empty keys and empty segments (`a//b`, leading or trailing `/`)
/// - `.` and `..`
/// - Backslashes and ASCII control characters
pub fn is_normal_key(key: &str) -> bool {
    !key.is_empty()
        && !key.chars().any(|c| c == '\\' || c.is_ascii_control())
        && key
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

/// A uniquely named directory owned by one pipeline run.
pub struct StagingArea {
    /// Path of the run directory (kept apart so it survives `close`)
    root: PathBuf,
    /// The guard itself; `None` only while dropping
    dir: Option<TempDir>,
}

impl Debug for StagingArea {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StagingArea").field(&self.root).finish()
    }
}

impl StagingArea {
    /// Create a fresh run directory under `staging_root`, creating the
    /// staging root itself if needed.
    #[instrument(err, level = "debug")]
    pub fn acquire(staging_root: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(staging_root)?;
        let dir = tempfile::Builder::new()
            .prefix("thumbforge-")
            .tempdir_in(staging_root)?;
        let root = dir.path().to_path_buf();
        tracing::debug!("Acquired staging area {root:?}");
        Ok(Self {
            root,
            dir: Some(dir),
        })
    }

    /// The run directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the object `key` of bucket `location` is staged:
    /// `{run dir}/{location}/{key}`.
    ///
    /// The key must already have passed [`is_normal_key`].
    pub fn source_path(&self, location: &str, key: &str) -> PathBuf {
        let mut path = self.root.join(location);
        path.extend(key.split('/'));
        path
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            // Cleanup is best effort; a failure here never changes the
            // outcome of the run.
            match dir.close() {
                Ok(()) => tracing::trace!("Released staging area {:?}", self.root),
                Err(e) => tracing::debug!(
                    "Staging area {:?} not removed (ignored): {e}",
                    self.root
                ),
            }
        }
    }
}
