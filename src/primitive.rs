//! Primitives and essential dependencies

use std::fmt::{Display, Formatter};

// Reexport or redefine types.

/// Anyhow error
pub use anyhow;

/// Tracing
pub use tracing;

use crate::{rewrite::RewriteError, store::StoreError};

/// Unified error type for one pipeline run.
///
/// Every variant ends up as `status=false` in the response. Content that
/// is simply not an accepted image is not an error at all; see
/// [`Outcome::Skipped`](crate::pipeline::Outcome::Skipped).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Rejected before any stage ran
    InvalidRequest(String),
    /// The source object does not exist
    SourceNotFound {
        /// Bucket
        location: String,
        /// Object key
        key: String,
    },
    /// Network or storage backend failure
    Transfer(#[source] anyhow::Error),
    /// Bytes passed sniffing but the codec refused them
    Decode(#[source] image::ImageError),
    /// JPEG encoding failed
    Encode(#[source] image::ImageError),
    /// The requested thumbnail would exceed the pixel budget
    TooLarge {
        width: u32,
        height: u32,
        budget: u64,
    },
    /// Staging directory or file operation failed
    LocalIo(
        #[from]
        #[source]
        std::io::Error,
    ),
    /// The destination key could not be derived
    Rewrite(
        #[from]
        #[source]
        RewriteError,
    ),
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::InvalidRequest(msg) => write!(f, "{msg}"),
            PipelineError::SourceNotFound { location, key } => {
                write!(f, "object {key:?} not found in {location:?}")
            }
            PipelineError::Transfer(e) => write!(f, "transfer failed: {e:#}"),
            PipelineError::Decode(e) => write!(f, "cannot decode image: {e}"),
            PipelineError::Encode(e) => write!(f, "cannot encode image: {e}"),
            PipelineError::TooLarge {
                width,
                height,
                budget,
            } => write!(
                f,
                "a {width}x{height} thumbnail exceeds the {budget} pixel budget"
            ),
            PipelineError::LocalIo(e) => write!(f, "staging I/O failed: {e}"),
            PipelineError::Rewrite(e) => write!(f, "{e}"),
        }
    }
}

// A store error keeps its class: missing objects stay distinguishable
// from broken transfers.
impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { location, key } => {
                PipelineError::SourceNotFound { location, key }
            }
            StoreError::Transfer(e) => PipelineError::Transfer(e),
            StoreError::Io(e) => PipelineError::LocalIo(e),
        }
    }
}

/// Result of a stage.
pub type Result<T> = std::result::Result<T, PipelineError>;
