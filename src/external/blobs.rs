//! Blob Store Interface
//!
//! Attachment bytes live outside the core in an object store. Keys follow
//! `attachments/{uuid}/{sanitized_filename}`; custom metadata carries the
//! checksum and provenance fields the handlers attach.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Debug, Clone, Default)]
pub struct BlobMetadata {
    pub content_type: Option<String>,
    pub custom: HashMap<String, String>,
}

/// Listing / head entry: everything but the bytes.
#[derive(Debug, Clone)]
pub struct BlobHead {
    pub key: String,
    pub size: u64,
    pub uploaded_at: u64,
    pub metadata: BlobMetadata,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, BlobMetadata)>>;
    async fn head(&self, key: &str) -> Result<Option<BlobHead>>;
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Heads of blobs under `prefix`, bounded by `limit`.
    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<BlobHead>>;
}

struct StoredBlob {
    bytes: Vec<u8>,
    metadata: BlobMetadata,
    uploaded_at: u64,
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, StoredBlob>,
}

impl MemoryBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Test hook: rewrite a blob's upload time so retention cutoffs can be
    /// exercised without waiting.
    pub fn backdate(&self, key: &str, uploaded_at: u64) {
        if let Some(mut blob) = self.blobs.get_mut(key) {
            blob.uploaded_at = uploaded_at;
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>, metadata: BlobMetadata) -> Result<()> {
        self.blobs.insert(
            key.to_string(),
            StoredBlob {
                bytes,
                metadata,
                uploaded_at: now_ms(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<(Vec<u8>, BlobMetadata)>> {
        Ok(self
            .blobs
            .get(key)
            .map(|b| (b.bytes.clone(), b.metadata.clone())))
    }

    async fn head(&self, key: &str) -> Result<Option<BlobHead>> {
        Ok(self.blobs.get(key).map(|b| BlobHead {
            key: key.to_string(),
            size: b.bytes.len() as u64,
            uploaded_at: b.uploaded_at,
            metadata: b.metadata.clone(),
        }))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.blobs.remove(key).is_some())
    }

    async fn list(&self, prefix: &str, limit: usize) -> Result<Vec<BlobHead>> {
        let mut heads: Vec<BlobHead> = self
            .blobs
            .iter()
            .filter(|b| b.key().starts_with(prefix))
            .take(limit)
            .map(|b| BlobHead {
                key: b.key().clone(),
                size: b.value().bytes.len() as u64,
                uploaded_at: b.value().uploaded_at,
                metadata: b.value().metadata.clone(),
            })
            .collect();
        heads.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(heads)
    }
}
