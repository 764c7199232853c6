use crate::error::{PpbError, Result};
use crate::hash::{ContentDigest, DIGEST_LEN};
use crate::storage::layout::{StorageLayout, write_atomic};
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;

/// Default upload ceiling: 100 MiB.
pub const MAX_SIZE: u64 = 100 * 1024 * 1024;

/// Outcome of a successful `BlobStore::put`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutBlobOutcome {
    Created,
    AlreadyPresent,
}

/// BlobStore keeps one file per distinct payload under `raw/{digest}`.
#[derive(Debug, Clone)]
pub struct BlobStore {
    raw_dir: PathBuf,
    staging_dir: PathBuf,
    max_size: u64,
}

impl BlobStore {
    pub fn new(layout: &StorageLayout, max_size: u64) -> Self {
        Self {
            raw_dir: layout.raw_dir(),
            staging_dir: layout.staging_dir(),
            max_size,
        }
    }

    /// Largest payload accepted, in bytes.
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Reject payloads above the ceiling. Performs no I/O.
    pub fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_size {
            return Err(PpbError::TooLarge {
                size,
                max: self.max_size,
            });
        }
        Ok(())
    }

    /// Whether a payload is stored under `digest`.
    pub async fn exists(&self, digest: &ContentDigest) -> bool {
        fs::try_exists(self.blob_path(digest)).await.unwrap_or(false)
    }

    /// Store a payload under `digest`.
    ///
    /// The caller is responsible for `digest` being the hash of `data`.
    pub async fn put(&self, digest: &ContentDigest, data: &[u8]) -> Result<PutBlobOutcome> {
        self.check_size(data.len() as u64)?;

        let blob_path = self.blob_path(digest);
        if fs::try_exists(&blob_path).await? {
            return Ok(PutBlobOutcome::AlreadyPresent);
        }

        write_atomic(&self.staging_dir, &blob_path, data).await?;
        tracing::debug!("Stored blob {} ({} bytes)", digest.short(), data.len());
        Ok(PutBlobOutcome::Created)
    }

    /// Read the payload stored under `digest`.
    pub async fn get(&self, digest: &ContentDigest) -> Result<Bytes> {
        match fs::read(self.blob_path(digest)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(PpbError::NotFound(digest.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Stored digests starting with `prefix`, stopping once `limit` matches
    /// have been collected. Files whose names are not digests are skipped.
    pub async fn digests_with_prefix(
        &self,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<ContentDigest>> {
        let mut matches = Vec::new();
        if limit == 0 {
            return Ok(matches);
        }

        let mut entries = fs::read_dir(&self.raw_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.starts_with(prefix) || !is_digest_name(&name) {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }

            matches.push(ContentDigest::from_str_checked(&name)?);
            if matches.len() >= limit {
                break;
            }
        }

        Ok(matches)
    }

    fn blob_path(&self, digest: &ContentDigest) -> PathBuf {
        self.raw_dir.join(digest.as_str())
    }
}

fn is_digest_name(name: &str) -> bool {
    name.len() == DIGEST_LEN && name.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash;

    fn open_store(max_size: u64) -> (tempfile::TempDir, StorageLayout, BlobStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(temp_dir.path());
        layout.ensure().unwrap();
        let store = BlobStore::new(&layout, max_size);
        (temp_dir, layout, store)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (_temp_dir, _layout, store) = open_store(MAX_SIZE);
        let hashed = hash(b"test data content");

        let outcome = store.put(&hashed.digest, b"test data content").await.unwrap();
        assert_eq!(outcome, PutBlobOutcome::Created);
        assert!(store.exists(&hashed.digest).await);

        let retrieved = store.get(&hashed.digest).await.unwrap();
        assert_eq!(retrieved, Bytes::from_static(b"test data content"));
    }

    #[tokio::test]
    async fn test_put_is_idempotent() {
        let (_temp_dir, layout, store) = open_store(MAX_SIZE);
        let hashed = hash(b"dedup me");

        assert_eq!(
            store.put(&hashed.digest, b"dedup me").await.unwrap(),
            PutBlobOutcome::Created
        );
        assert_eq!(
            store.put(&hashed.digest, b"dedup me").await.unwrap(),
            PutBlobOutcome::AlreadyPresent
        );

        assert_eq!(std::fs::read_dir(layout.raw_dir()).unwrap().count(), 1);
        assert_eq!(std::fs::read_dir(layout.staging_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_duplicate_puts_converge() {
        let (_temp_dir, layout, store) = open_store(MAX_SIZE);
        let data = vec![7u8; 64 * 1024];
        let hashed = hash(&data);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let digest = hashed.digest.clone();
            let data = data.clone();
            handles.push(tokio::spawn(async move { store.put(&digest, &data).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.get(&hashed.digest).await.unwrap().as_ref(), &data[..]);
        assert_eq!(std::fs::read_dir(layout.raw_dir()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_put_rejects_oversized_payload_without_io() {
        let (_temp_dir, layout, store) = open_store(4);
        let hashed = hash(b"12345");

        let result = store.put(&hashed.digest, b"12345").await;
        assert!(matches!(result, Err(PpbError::TooLarge { size: 5, max: 4 })));
        assert_eq!(std::fs::read_dir(layout.raw_dir()).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(layout.staging_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_get_missing_blob() {
        let (_temp_dir, _layout, store) = open_store(MAX_SIZE);
        let hashed = hash(b"never stored");

        assert!(!store.exists(&hashed.digest).await);
        assert!(matches!(
            store.get(&hashed.digest).await,
            Err(PpbError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_digests_with_prefix_skips_foreign_files() {
        let (_temp_dir, layout, store) = open_store(MAX_SIZE);
        let hashed = hash(b"hello");
        store.put(&hashed.digest, b"hello").await.unwrap();
        std::fs::write(layout.raw_dir().join("2cf24dba-notes.txt"), b"x").unwrap();

        let matches = store.digests_with_prefix("2cf2", 2).await.unwrap();
        assert_eq!(matches, vec![hashed.digest.clone()]);
        assert_eq!(store.digests_with_prefix("", usize::MAX).await.unwrap().len(), 1);
    }
}
