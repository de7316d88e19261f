//! Destination key derivation
//!
//! A thumbnail's key is computed from where its transformed file sits in the
//! run directory. The mapping is textual: no file system access, no shared
//! state, so one source can fan out to any number of presets.

use std::path::{Component, Path, PathBuf};

use crate::staging::TRANSFORM_MARKER;

/// Why a destination key could not be derived
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("root folder and preset name must not be empty")]
    EmptyConfig,

    #[error("{0:?} is not inside the staged bucket")]
    OutsideStaging(PathBuf),

    #[error("staged path is not valid UTF-8")]
    NonUtf8,

    #[error("nothing left of {0:?} once the transform marker is removed")]
    EmptyName(String),
}

/// Derive the key a transformed file is published under:
/// `{root_folder}/{preset_name}/{relative}`.
///
/// `relative` is the path of `transformed` below
/// `{run_root}/{source_location}/{rewrite_segment}/`, or below
/// `{run_root}/{source_location}/` if it is not under the rewrite segment
/// (or the segment is empty). Every transform marker is removed from it.
pub fn derive_destination_key(
    transformed: &Path,
    run_root: &Path,
    source_location: &str,
    rewrite_segment: &str,
    root_folder: &str,
    preset_name: &str,
) -> Result<String, RewriteError> {
    let root_folder = root_folder.trim_end_matches('/');
    let preset_name = preset_name.trim_matches('/');
    if root_folder.is_empty() || preset_name.is_empty() {
        return Err(RewriteError::EmptyConfig);
    }

    let bucket_dir = run_root.join(source_location);
    let mut rewrite_dir = bucket_dir.clone();
    rewrite_dir.extend(rewrite_segment.split('/').filter(|s| !s.is_empty()));

    // Prefixes are compared component-wise, so "a" never matches "ab".
    let relative = transformed
        .strip_prefix(&rewrite_dir)
        .or_else(|_| transformed.strip_prefix(&bucket_dir))
        .map_err(|_| RewriteError::OutsideStaging(transformed.to_path_buf()))?;

    let mut segments = Vec::new();
    for component in relative.components() {
        let Component::Normal(seg) = component else {
            return Err(RewriteError::OutsideStaging(transformed.to_path_buf()));
        };
        let seg = seg.to_str().ok_or(RewriteError::NonUtf8)?;
        let stripped = strip_marker(seg);
        if stripped.is_empty() {
            return Err(RewriteError::EmptyName(seg.to_string()));
        }
        segments.push(stripped);
    }
    if segments.is_empty() {
        return Err(RewriteError::OutsideStaging(transformed.to_path_buf()));
    }

    Ok(format!("{root_folder}/{preset_name}/{}", segments.join("/")))
}

/// Remove the marker until it no longer occurs, including occurrences that
/// only appear once an inner one is gone.
fn strip_marker(segment: &str) -> String {
    let mut out = segment.to_string();
    while out.contains(TRANSFORM_MARKER) {
        out = out.replace(TRANSFORM_MARKER, "");
    }
    out
}
