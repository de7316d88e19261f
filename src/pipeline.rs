//! Pipeline orchestration
//!
//! One run takes one validated [`Job`] through the stages
//!
//! ```text
//! Fetching -> Sniffing -> Transforming -> Rewriting -> Publishing
//! ```
//!
//! strictly in order. The first failing stage ends the run. Content that is
//! not an accepted image ends it early too, but as [`Outcome::Skipped`],
//! not as a failure. Everything the run staged lives in its own
//! [`StagingArea`], which is released on every exit path.

use std::{
    fmt::{Display, Formatter},
    num::NonZeroU32,
    path::PathBuf,
    sync::Arc,
};

use crate::{
    api::Request,
    blob::{self, Thumbnail},
    primitive::{tracing::instrument, PipelineError},
    rewrite,
    sniff::{self, ImageKind, Sniffed},
    staging::StagingArea,
    store::BlobStore,
    transform,
};

/// A request that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub src_key: String,
    pub src_bucket: String,
    pub dst_bucket: String,
    pub root_folder: String,
    pub preset_name: String,
    pub rewrite_part: String,
    pub width: NonZeroU32,
}

/// Where a run was when it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validating,
    Fetching,
    Sniffing,
    Transforming,
    Rewriting,
    Publishing,
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Validating => "validating",
            Stage::Fetching => "fetching",
            Stage::Sniffing => "sniffing",
            Stage::Transforming => "transforming",
            Stage::Rewriting => "rewriting",
            Stage::Publishing => "publishing",
        })
    }
}

/// A failed run: the stage, the cause, and the message the caller sees.
#[derive(Debug)]
pub struct Failure {
    pub stage: Stage,
    pub error: PipelineError,
    pub message: String,
}

impl Failure {
    /// Rejected before any stage ran.
    pub fn invalid(error: PipelineError) -> Self {
        Self {
            stage: Stage::Validating,
            message: format!("invalid request: {error}"),
            error,
        }
    }

    fn at(stage: Stage, job: &Job, error: PipelineError) -> Self {
        let message = match stage {
            Stage::Validating => format!("invalid request: {error}"),
            Stage::Fetching => format!(
                "file {} not exists in {}: {error}",
                job.src_key, job.src_bucket
            ),
            Stage::Sniffing | Stage::Transforming => {
                format!("file {} could not be resized: {error}", job.src_key)
            }
            Stage::Rewriting => format!("cannot derive destination key: {error}"),
            Stage::Publishing => {
                format!("unable to upload to {}: {error}", job.dst_bucket)
            }
        };
        Self {
            stage,
            error,
            message,
        }
    }
}

impl Display for Failure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// How a run ended. Exactly one per run.
#[derive(Debug)]
pub enum Outcome {
    /// A thumbnail was published
    Succeeded(Thumbnail),
    /// The source is not an accepted image; nothing was published
    Skipped { reason: String },
    /// A stage failed
    Failed(Failure),
}

/// Which content type a thumbnail is declared with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DeclaredContentType {
    /// The type sniffed from the source, even when it is not JPEG
    #[default]
    Source,
    /// Always `image/jpeg`, which is what the thumbnail actually is
    Output,
}

impl DeclaredContentType {
    pub fn content_type(self, source: ImageKind) -> &'static str {
        match self {
            DeclaredContentType::Source => source.mime_type(),
            DeclaredContentType::Output => transform::OUTPUT_MIME_TYPE,
        }
    }
}

/// Tag a stage's error with the stage and the job it ran for.
trait StageExt<T> {
    fn at(self, stage: Stage, job: &Job) -> std::result::Result<T, Failure>;
}

impl<T, E> StageExt<T> for std::result::Result<T, E>
where
    E: Into<PipelineError>,
{
    fn at(self, stage: Stage, job: &Job) -> std::result::Result<T, Failure> {
        self.map_err(|e| Failure::at(stage, job, e.into()))
    }
}

/// The thumbnail pipeline with its collaborators
pub struct Pipeline {
    store: Arc<dyn BlobStore>,
    staging_root: PathBuf,
    declared: DeclaredContentType,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn BlobStore>,
        staging_root: impl Into<PathBuf>,
        declared: DeclaredContentType,
    ) -> Self {
        Self {
            store,
            staging_root: staging_root.into(),
            declared,
        }
    }

    /// Validate a request and run it.
    pub async fn handle(&self, request: &Request) -> Outcome {
        match request.validate() {
            Ok(job) => self.run(&job).await,
            Err(e) => {
                let outcome = Outcome::Failed(Failure::invalid(e));
                log_outcome(&outcome);
                outcome
            }
        }
    }

    /// Run a validated job to its outcome.
    #[instrument(skip(self, job), fields(
        src_bucket = %job.src_bucket,
        src_key = %job.src_key,
        width = job.width.get(),
    ))]
    pub async fn run(&self, job: &Job) -> Outcome {
        let outcome = match self.stages(job).await {
            Ok(outcome) => outcome,
            Err(failure) => Outcome::Failed(failure),
        };
        log_outcome(&outcome);
        outcome
    }

    async fn stages(&self, job: &Job) -> std::result::Result<Outcome, Failure> {
        // Dropped on return, taking every staged file with it.
        let staging = StagingArea::acquire(&self.staging_root).at(Stage::Fetching, job)?;

        tracing::debug!("Fetching");
        let source = blob::fetch(
            self.store.as_ref(),
            &staging,
            &job.src_bucket,
            &job.src_key,
        )
        .await
        .at(Stage::Fetching, job)?;

        let sniffed = sniff::sniff_file(&source).await.at(Stage::Sniffing, job)?;
        tracing::debug!(
            accepted = sniffed.is_accepted(),
            mime_type = sniffed.mime_type(),
            "Sniffed"
        );
        let kind = match sniffed {
            Sniffed::Accepted(kind) => kind,
            Sniffed::Rejected { detected } => {
                return Ok(Outcome::Skipped {
                    reason: format!(
                        "{} is not an accepted image ({})",
                        job.src_key,
                        detected.unwrap_or("unrecognized content")
                    ),
                })
            }
        };

        tracing::debug!("Transforming {kind:?}");
        let transformed = transform::resize(&source, kind, job.width)
            .await
            .at(Stage::Transforming, job)?;

        tracing::debug!("Rewriting");
        let key = rewrite::derive_destination_key(
            &transformed,
            staging.root(),
            &job.src_bucket,
            &job.rewrite_part,
            &job.root_folder,
            &job.preset_name,
        )
        .at(Stage::Rewriting, job)?;

        tracing::debug!("Publishing to {}/{key}", job.dst_bucket);
        let thumb = blob::publish(
            self.store.as_ref(),
            &transformed,
            self.declared.content_type(kind),
            &job.dst_bucket,
            &key,
        )
        .await
        .at(Stage::Publishing, job)?;

        Ok(Outcome::Succeeded(thumb))
    }
}

fn log_outcome(outcome: &Outcome) {
    match outcome {
        Outcome::Succeeded(thumb) => {
            tracing::info!(key = %thumb.key, content_type = %thumb.content_type, "Published")
        }
        Outcome::Skipped { reason } => tracing::info!("Skipped: {reason}"),
        Outcome::Failed(failure) => tracing::warn!(
            stage = %failure.stage,
            error = ?failure.error,
            "{}",
            failure.message
        ),
    }
}
