//! Blob storage
//!
//! How the pipeline talks to blob storage. Objects
//! are addressed by a location (a bucket) and a key. The pipeline never
//! holds a process-wide client; a [`BlobStore`] is constructed once and
//! handed to the [`Pipeline`](crate::pipeline::Pipeline).
//!
//! Implementations:
//! - [`S3Store`](crate::s3::S3Store): Amazon S3 or anything that speaks it.
//! - [`FsStore`]: buckets are directories on the local disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{
    primitive::{anyhow, tracing::instrument},
    staging::is_normal_key,
};

/// Access policy granted to an uploaded object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicy {
    /// Anyone may read the object
    PublicRead,
}

impl AccessPolicy {
    /// Canned ACL name as understood by S3
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessPolicy::PublicRead => "public-read",
        }
    }
}

/// Storage operation errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object {key:?} not found in {location:?}")]
    NotFound { location: String, key: String },

    #[error("transfer failed: {0}")]
    Transfer(#[source] anyhow::Error),

    #[error("local I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// What the pipeline needs from blob storage.
///
/// Both operations are single attempts; retrying is the caller's call.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Download an object into the local file `dest`, creating or
    /// truncating it. The parent directory must exist.
    ///
    /// Returns the number of bytes written.
    async fn download(
        &self,
        location: &str,
        key: &str,
        dest: &Path,
    ) -> StoreResult<u64>;

    /// Upload `body` as an object with the given content type and
    /// access policy, replacing any existing object.
    async fn upload(
        &self,
        location: &str,
        key: &str,
        content_type: &str,
        policy: AccessPolicy,
        body: Vec<u8>,
    ) -> StoreResult<()>;
}

/// Buckets as directories: an object lives at `{root}/{location}/{key}`.
///
/// Content type and access policy have nowhere to go on a plain file
/// system, so they are only logged.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Serve buckets out of `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Locate an object, refusing anything that could escape the root.
    fn object_path(&self, location: &str, key: &str) -> StoreResult<PathBuf> {
        if !is_normal_key(location) || location.contains('/') {
            return Err(StoreError::Transfer(anyhow::anyhow!(
                "bad bucket name {location:?}"
            )));
        }
        if !is_normal_key(key) {
            return Err(StoreError::Transfer(anyhow::anyhow!(
                "bad object key {key:?}"
            )));
        }
        let mut path = self.root.join(location);
        path.extend(key.split('/'));
        Ok(path)
    }
}

#[async_trait]
impl BlobStore for FsStore {
    #[instrument(err, level = "debug", skip(self))]
    async fn download(
        &self,
        location: &str,
        key: &str,
        dest: &Path,
    ) -> StoreResult<u64> {
        let src = self.object_path(location, key)?;
        let not_found = || StoreError::NotFound {
            location: location.to_string(),
            key: key.to_string(),
        };
        match tokio::fs::metadata(&src).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(not_found()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(not_found())
            }
            Err(e) => return Err(StoreError::Transfer(e.into())),
        }
        let n = tokio::fs::copy(&src, dest)
            .await
            .map_err(|e| StoreError::Transfer(e.into()))?;
        tracing::debug!("Copied {n} bytes from {src:?}");
        Ok(n)
    }

    #[instrument(err, level = "debug", skip(self, body), fields(size = body.len()))]
    async fn upload(
        &self,
        location: &str,
        key: &str,
        content_type: &str,
        policy: AccessPolicy,
        body: Vec<u8>,
    ) -> StoreResult<()> {
        let dest = self.object_path(location, key)?;
        if let Some(dir) = dest.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::Transfer(e.into()))?;
        }
        tokio::fs::write(&dest, body)
            .await
            .map_err(|e| StoreError::Transfer(e.into()))?;
        tracing::debug!(
            "Wrote {dest:?} ({content_type}, {policy})",
            policy = policy.as_str()
        );
        Ok(())
    }
}
