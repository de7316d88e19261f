//! In-memory [`BlobStore`] for tests.

use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    primitive::anyhow,
    store::{AccessPolicy, BlobStore, StoreError, StoreResult},
};

/// An object as the store holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemObject {
    pub content_type: String,
    pub policy: Option<AccessPolicy>,
    pub data: Vec<u8>,
}

/// Objects keyed by `(location, key)`.
#[derive(Debug, Default)]
pub struct MemStore {
    objects: Mutex<HashMap<(String, String), MemObject>>,
    fail_uploads: AtomicBool,
    uploads: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object.
    pub fn put(&self, location: &str, key: &str, data: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(
            (location.to_string(), key.to_string()),
            MemObject {
                content_type: String::new(),
                policy: None,
                data: data.into(),
            },
        );
    }

    pub fn get(&self, location: &str, key: &str) -> Option<MemObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(location.to_string(), key.to_string()))
            .cloned()
    }

    /// Make every upload from now on fail as unreachable.
    pub fn fail_uploads(&self) {
        self.fail_uploads.store(true, Ordering::SeqCst);
    }

    /// Number of uploads that reached the store.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Keys held in `location`, sorted.
    pub fn keys(&self, location: &str) -> Vec<String> {
        let mut keys: Vec<_> = self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(l, _)| l == location)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemStore {
    async fn download(
        &self,
        location: &str,
        key: &str,
        dest: &Path,
    ) -> StoreResult<u64> {
        let data = self
            .get(location, key)
            .ok_or_else(|| StoreError::NotFound {
                location: location.to_string(),
                key: key.to_string(),
            })?
            .data;
        tokio::fs::write(dest, &data).await?;
        Ok(data.len() as u64)
    }

    async fn upload(
        &self,
        location: &str,
        key: &str,
        content_type: &str,
        policy: AccessPolicy,
        body: Vec<u8>,
    ) -> StoreResult<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StoreError::Transfer(anyhow::anyhow!(
                "{location} is unreachable"
            )));
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().unwrap().insert(
            (location.to_string(), key.to_string()),
            MemObject {
                content_type: content_type.to_string(),
                policy: Some(policy),
                data: body,
            },
        );
        Ok(())
    }
}
