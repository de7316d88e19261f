//! S3 implementation of [`BlobStore`].

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::{
    config::Region, error::DisplayErrorContext, primitives::ByteStream,
    types::ObjectCannedAcl, Client,
};
use tokio::io::AsyncWriteExt;

use crate::{
    primitive::{anyhow, tracing::instrument},
    store::{AccessPolicy, BlobStore, StoreError, StoreResult},
};

/// Blob store backed by an S3 client.
#[derive(Debug, Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Wrap an existing client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the SDK's default credential and region chain,
    /// optionally pointed at an S3-compatible endpoint.
    #[instrument]
    pub async fn from_env(
        endpoint: Option<&str>,
        region: Option<&str>,
        force_path_style: bool,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(Region::new(region.to_string()));
        }
        if let Some(endpoint) = endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(force_path_style)
            .build();
        Self::new(Client::from_conf(config))
    }
}

/// Translate an access policy into a canned ACL.
fn canned_acl(policy: AccessPolicy) -> ObjectCannedAcl {
    match policy {
        AccessPolicy::PublicRead => ObjectCannedAcl::PublicRead,
    }
}

#[async_trait]
impl BlobStore for S3Store {
    #[instrument(err, level = "debug", skip(self))]
    async fn download(
        &self,
        location: &str,
        key: &str,
        dest: &Path,
    ) -> StoreResult<u64> {
        let output = self
            .client
            .get_object()
            .bucket(location)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    StoreError::NotFound {
                        location: location.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Transfer(anyhow::anyhow!(
                        "GetObject s3://{location}/{key}: {}",
                        DisplayErrorContext(&e)
                    ))
                }
            })?;

        // Stream the body straight into the staged file.
        let mut body = output.body.into_async_read();
        let mut file = tokio::fs::File::create(dest).await?;
        let n = tokio::io::copy(&mut body, &mut file).await.map_err(|e| {
            StoreError::Transfer(anyhow::anyhow!(
                "GetObject s3://{location}/{key} body: {e}"
            ))
        })?;
        file.flush().await?;
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
        self.client
            .put_object()
            .bucket(location)
            .key(key)
            .content_type(content_type)
            .acl(canned_acl(policy))
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                StoreError::Transfer(anyhow::anyhow!(
                    "PutObject s3://{location}/{key}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;
        Ok(())
    }
}
