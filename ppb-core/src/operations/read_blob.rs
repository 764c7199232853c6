use crate::{BlobStore, ContentDigest, PpbError, Resolution, Result, ShortHashResolver};
use bytes::Bytes;

#[derive(Clone)]
pub struct ReadBlobOperation {
    blob_store: BlobStore,
    resolver: ShortHashResolver,
}

#[derive(Debug, Clone)]
pub struct ReadBlobOperationRequest {
    /// Full digest or a prefix of at most 16 hex characters.
    pub identifier: String,
}

#[derive(Debug, Clone)]
pub struct ReadBlobOperationResult {
    pub digest: ContentDigest,
    pub body: Bytes,
}

#[derive(Debug, Clone)]
pub enum ReadBlobOperationOutcome {
    Found(ReadBlobOperationResult),
    NotFound,
}

impl ReadBlobOperation {
    pub fn new(blob_store: BlobStore) -> Self {
        let resolver = ShortHashResolver::new(blob_store.clone());
        Self {
            blob_store,
            resolver,
        }
    }

    /// Resolve and read a blob. A prefix shared by several blobs is
    /// reported as `PpbError::AmbiguousShortHash`.
    pub async fn run(&self, request: ReadBlobOperationRequest) -> Result<ReadBlobOperationOutcome> {
        let digest = match self.resolver.resolve(&request.identifier).await? {
            Resolution::Exact(digest) | Resolution::Prefix(digest) => digest,
            Resolution::NotFound => return Ok(ReadBlobOperationOutcome::NotFound),
            Resolution::Ambiguous => {
                return Err(PpbError::AmbiguousShortHash(request.identifier));
            }
        };

        match self.blob_store.get(&digest).await {
            Ok(body) => Ok(ReadBlobOperationOutcome::Found(ReadBlobOperationResult {
                digest,
                body,
            })),
            Err(PpbError::NotFound(_)) => Ok(ReadBlobOperationOutcome::NotFound),
            Err(error) => {
                tracing::error!("Failed to read file {}: {}", request.identifier, error);
                Err(error)
            }
        }
    }
}
