//! Content sniffing
//!
//! Classify staged bytes by their magic numbers. Names and declared
//! metadata are never consulted.

use std::path::Path;

use tokio::io::AsyncReadExt;

use crate::primitive::tracing::instrument;

/// How many leading bytes are inspected. Plenty for any signature `infer`
/// knows about.
const SNIFF_LEN: u64 = 8192;

/// The accepted image kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
}

impl ImageKind {
    /// MIME type of the kind
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Png => "image/png",
        }
    }

    /// The codec that decodes the kind
    pub fn format(&self) -> image::ImageFormat {
        match self {
            ImageKind::Jpeg => image::ImageFormat::Jpeg,
            ImageKind::Png => image::ImageFormat::Png,
        }
    }

    fn from_mime_type(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" => Some(ImageKind::Jpeg),
            "image/png" => Some(ImageKind::Png),
            _ => None,
        }
    }
}

/// What sniffing found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sniffed {
    /// One of the accepted image kinds
    Accepted(ImageKind),
    /// Anything else. `detected` is the MIME type `infer` recognized, if
    /// any; it is for logging only.
    Rejected { detected: Option<&'static str> },
}

impl Sniffed {
    /// Whether the content is an accepted image
    pub fn is_accepted(&self) -> bool {
        matches!(self, Sniffed::Accepted(_))
    }

    /// MIME type of an accepted image, or `""`
    pub fn mime_type(&self) -> &'static str {
        match self {
            Sniffed::Accepted(kind) => kind.mime_type(),
            Sniffed::Rejected { .. } => "",
        }
    }
}

/// Classify raw bytes.
pub fn classify(bytes: &[u8]) -> Sniffed {
    match infer::get(bytes) {
        Some(t) => match ImageKind::from_mime_type(t.mime_type()) {
            Some(kind) => Sniffed::Accepted(kind),
            None => Sniffed::Rejected {
                detected: Some(t.mime_type()),
            },
        },
        None => Sniffed::Rejected { detected: None },
    }
}

/// Classify a staged file by its leading bytes.
#[instrument(err, level = "debug")]
pub async fn sniff_file(path: &Path) -> std::io::Result<Sniffed> {
    let file = tokio::fs::File::open(path).await?;
    let mut head = Vec::with_capacity(SNIFF_LEN as usize);
    file.take(SNIFF_LEN).read_to_end(&mut head).await?;
    let sniffed = classify(&head);
    tracing::debug!("Sniffed {sniffed:?} from {} leading bytes", head.len());
    Ok(sniffed)
}
