//! Wire types and the HTTP adapter

use std::{num::NonZeroU32, sync::Arc};

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::{
    pipeline::{Failure, Job, Outcome, Pipeline},
    primitive::{PipelineError, Result},
    staging::is_normal_key,
};

/// One thumbnail request.
///
/// Missing fields deserialize to empty values and are caught by
/// [`Request::validate`], so every malformed request still gets a
/// [`Response`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
#[serde(default)]
pub struct Request {
    pub src_key: String,
    pub src_bucket: String,
    pub dst_bucket: String,
    pub root_folder: String,
    pub preset_name: String,
    pub rewrite_part: String,
    pub width: i64,
}

impl Request {
    /// Check every field and turn the request into a [`Job`].
    pub fn validate(&self) -> Result<Job> {
        let required = [
            ("src_key", &self.src_key),
            ("src_bucket", &self.src_bucket),
            ("dst_bucket", &self.dst_bucket),
            ("root_folder", &self.root_folder),
            ("preset_name", &self.preset_name),
        ];
        if let Some((name, _)) = required.iter().find(|(_, v)| v.is_empty()) {
            return Err(invalid(format!("{name} is required")));
        }
        if !is_normal_key(&self.src_key) {
            return Err(invalid(format!("src_key {:?} is not a plain key", self.src_key)));
        }
        if !is_normal_key(&self.src_bucket) || self.src_bucket.contains('/') {
            return Err(invalid(format!(
                "src_bucket {:?} is not a bucket name",
                self.src_bucket
            )));
        }
        let width = u32::try_from(self.width)
            .ok()
            .and_then(NonZeroU32::new)
            .ok_or_else(|| invalid(format!("width must be positive, got {}", self.width)))?;

        Ok(Job {
            src_key: self.src_key.clone(),
            src_bucket: self.src_bucket.clone(),
            dst_bucket: self.dst_bucket.clone(),
            root_folder: self.root_folder.clone(),
            preset_name: self.preset_name.clone(),
            rewrite_part: self.rewrite_part.clone(),
            width,
        })
    }
}

fn invalid(msg: String) -> PipelineError {
    PipelineError::InvalidRequest(msg)
}

/// One response, whatever happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
pub struct Response {
    pub status: bool,
    pub key: String,
    pub content_type: String,
    pub data: String,
    pub error: String,
}

impl From<&Outcome> for Response {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Succeeded(thumb) => Response {
                status: true,
                key: thumb.key.clone(),
                content_type: thumb.content_type.clone(),
                data: thumb.data.clone(),
                error: String::new(),
            },
            Outcome::Skipped { .. } => Response {
                status: true,
                ..Default::default()
            },
            Outcome::Failed(failure) => Response {
                status: false,
                error: failure.message.clone(),
                ..Default::default()
            },
        }
    }
}

/// Parse a raw request body and run it. A body that is not a request is
/// an invalid request like any other.
pub async fn process(pipeline: &Pipeline, raw: &str) -> Outcome {
    match serde_json::from_str::<Request>(raw) {
        Ok(request) => pipeline.handle(&request).await,
        Err(e) => {
            let failure = Failure::invalid(invalid(format!("malformed request: {e}")));
            tracing::warn!("{failure}");
            Outcome::Failed(failure)
        }
    }
}

/// HTTP front: `POST /` runs one request, `GET /health` answers `ok`.
pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/", post(invoke))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(pipeline)
}

/// The outcome travels in `status`; the HTTP status is always 200.
async fn invoke(State(pipeline): State<Arc<Pipeline>>, body: String) -> Json<Response> {
    let outcome = process(&pipeline, &body).await;
    Json(Response::from(&outcome))
}

async fn health() -> &'static str {
    "ok"
}
