//! Moving objects between blob storage and the staging area

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::{
    primitive::{tracing::instrument, Result},
    staging::StagingArea,
    store::{AccessPolicy, BlobStore},
};

/// A published thumbnail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    /// Destination key
    pub key: String,
    /// Content type the object was uploaded with
    pub content_type: String,
    /// Base64 (standard, padded) of the uploaded bytes
    pub data: String,
}

/// Download `key` of `location` into the staging area, creating the
/// directories its key implies. Returns the staged path.
#[instrument(err, level = "debug", skip(store))]
pub async fn fetch(
    store: &dyn BlobStore,
    staging: &StagingArea,
    location: &str,
    key: &str,
) -> Result<PathBuf> {
    let staged = staging.source_path(location, key);
    if let Some(dir) = staged.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let n = store.download(location, key, &staged).await?;
    tracing::debug!("Staged {n} bytes at {staged:?}");
    Ok(staged)
}

/// Upload the transformed file as a publicly readable object, then read it
/// back for the inline payload.
#[instrument(err, level = "debug", skip(store))]
pub async fn publish(
    store: &dyn BlobStore,
    transformed: &Path,
    content_type: &str,
    location: &str,
    key: &str,
) -> Result<Thumbnail> {
    let body = tokio::fs::read(transformed).await?;
    store
        .upload(location, key, content_type, AccessPolicy::PublicRead, body)
        .await?;
    tracing::debug!("Uploaded {location}/{key}");

    // What the response carries is what sits on disk after the upload.
    let bytes = tokio::fs::read(transformed).await?;
    Ok(Thumbnail {
        key: key.to_string(),
        content_type: content_type.to_string(),
        data: STANDARD.encode(bytes),
    })
}
