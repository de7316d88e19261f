//! Thumbnails on demand for images in blob storage

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

mod api; // Wire types + HTTP adapter
mod blob; // Fetch and publish
mod config; // Command line and environment
#[cfg(test)]
mod memstore; // In-memory store for tests
mod pipeline; // Orchestration
mod primitive; // Primitives + essential dependencies
mod rewrite; // Destination keys
mod s3; // S3 store
mod sniff; // Content sniffing
mod staging; // Per-run staging area
mod store; // Blob store seam + file system store
mod transform; // Resize + re-encode

use crate::{
    config::{Cli, Command},
    pipeline::{Outcome, Pipeline},
    primitive::anyhow::{self, Context},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the response in `invoke`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let pipeline = cli.config.pipeline().await?;
    match cli.command {
        Command::Invoke { request } => invoke(&pipeline, request).await,
        Command::Serve { bind } => serve(pipeline, bind).await,
    }
}

/// Run one request and print its response. A failed run also fails the
/// process, with the underlying error.
async fn invoke(pipeline: &Pipeline, request: Option<PathBuf>) -> anyhow::Result<()> {
    let raw = match request {
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Cannot read the request from {path:?}"))?,
        None => {
            let mut raw = String::new();
            tokio::io::stdin()
                .read_to_string(&mut raw)
                .await
                .context("Cannot read the request from stdin")?;
            raw
        }
    };

    let outcome = api::process(pipeline, &raw).await;
    let response = api::Response::from(&outcome);
    println!("{}", serde_json::to_string(&response)?);

    match outcome {
        Outcome::Failed(failure) => {
            Err(anyhow::Error::new(failure.error).context(failure.message))
        }
        Outcome::Succeeded(_) | Outcome::Skipped { .. } => Ok(()),
    }
}

async fn serve(pipeline: Pipeline, bind: SocketAddr) -> anyhow::Result<()> {
    let app = api::router(Arc::new(pipeline));
    tracing::info!("Serving at {bind}");
    axum::Server::bind(&bind)
        .serve(app.into_make_service())
        .await
        .context("The server stopped")
}
