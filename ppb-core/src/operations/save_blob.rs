use crate::{
    BlobMeta, BlobStore, ContentDigest, MetadataStore, PpbError, PutBlobOutcome, Result, hash,
};
use bytes::Bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Clone)]
pub struct SaveBlobOperation {
    blob_store: BlobStore,
    metadata_store: MetadataStore,
    locks: Arc<DigestLocks>,
}

#[derive(Debug, Clone)]
pub struct SaveBlobOperationRequest {
    pub body: Bytes,
    /// Base address used to build the retrieval locator, e.g. `http://host:5000`.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveBlobOperationOutcome {
    Created,
    AlreadyStored,
}

#[derive(Debug, Clone)]
pub struct SaveBlobOperationResult {
    pub outcome: SaveBlobOperationOutcome,
    pub meta: BlobMeta,
    pub url: Option<String>,
}

impl SaveBlobOperation {
    pub fn new(blob_store: BlobStore, metadata_store: MetadataStore) -> Self {
        Self {
            blob_store,
            metadata_store,
            locks: Arc::new(DigestLocks::default()),
        }
    }

    pub async fn run(&self, request: SaveBlobOperationRequest) -> Result<SaveBlobOperationResult> {
        let SaveBlobOperationRequest { body, base_url } = request;

        if let Err(error) = self.blob_store.check_size(body.len() as u64) {
            tracing::warn!(
                "Upload rejected: size {} exceeds max {}",
                body.len(),
                self.blob_store.max_size()
            );
            return Err(error);
        }

        let hashed = hash(&body);
        let digest = hashed.digest;
        let url = base_url.map(|base| retrieval_url(&base, &digest));

        let _guard = self.locks.acquire(&digest).await;

        if let Some(meta) = self.existing_meta(&digest).await {
            tracing::info!("File {} already exists, skipping save", digest.short());
            return Ok(SaveBlobOperationResult {
                outcome: SaveBlobOperationOutcome::AlreadyStored,
                meta,
                url,
            });
        }

        let blob_outcome = self.blob_store.put(&digest, &body).await.map_err(|error| {
            tracing::error!("Failed to save blob {}: {}", digest.short(), error);
            error
        })?;
        if blob_outcome == PutBlobOutcome::AlreadyPresent {
            tracing::info!("Completing descriptor for existing blob {}", digest.short());
        }

        let meta = self
            .metadata_store
            .put(&digest, hashed.size, Utc::now())
            .await
            .map_err(|error| {
                tracing::error!("Failed to save metadata for {}: {}", digest.short(), error);
                error
            })?;

        tracing::info!("Saved file {} ({} bytes)", digest.short(), hashed.size);
        Ok(SaveBlobOperationResult {
            outcome: SaveBlobOperationOutcome::Created,
            meta,
            url,
        })
    }

    /// Metadata of a fully persisted pair, or `None` when either half is
    /// missing or the descriptor is unreadable.
    async fn existing_meta(&self, digest: &ContentDigest) -> Option<BlobMeta> {
        if !self.blob_store.exists(digest).await {
            return None;
        }

        match self.metadata_store.get(digest).await {
            Ok(meta) => Some(meta),
            Err(PpbError::NotFound(_)) => None,
            Err(error) => {
                tracing::warn!(
                    "Rewriting unreadable descriptor for {}: {}",
                    digest.short(),
                    error
                );
                None
            }
        }
    }
}

pub fn retrieval_url(base_url: &str, digest: &ContentDigest) -> String {
    format!("{}/raw/{}", base_url.trim_end_matches('/'), digest.short())
}

/// In-process locks keyed by digest so concurrent saves of the same content
/// converge on a single descriptor.
#[derive(Default)]
struct DigestLocks {
    locks: Mutex<HashMap<ContentDigest, Arc<AsyncMutex<()>>>>,
}

impl DigestLocks {
    async fn acquire(&self, digest: &ContentDigest) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(digest.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }
}
