use crate::error::{PpbError, Result};
use crate::hash::ContentDigest;
use crate::storage::layout::{StorageLayout, write_atomic};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;

/// Descriptor persisted next to every blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMeta {
    #[serde(with = "unix_seconds")]
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub checksum: String,
    pub short: String,
}

impl BlobMeta {
    pub fn new(digest: &ContentDigest, size: u64, created_at: DateTime<Utc>) -> Self {
        // Descriptors persist microsecond precision.
        let created_at =
            DateTime::<Utc>::from_timestamp_micros(created_at.timestamp_micros()).unwrap_or(created_at);
        Self {
            created_at,
            size,
            checksum: digest.to_string(),
            short: digest.short().to_string(),
        }
    }
}

/// `created_at` is stored as fractional Unix seconds.
mod unix_seconds {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.timestamp_micros() as f64 / 1_000_000.0)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        let micros = (seconds * 1_000_000.0).round() as i64;
        DateTime::<Utc>::from_timestamp_micros(micros)
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", seconds)))
    }
}

/// MetadataStore keeps one JSON descriptor per blob under `meta/{digest}.json`.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    meta_dir: PathBuf,
    staging_dir: PathBuf,
}

impl MetadataStore {
    pub fn new(layout: &StorageLayout) -> Self {
        Self {
            meta_dir: layout.meta_dir(),
            staging_dir: layout.staging_dir(),
        }
    }

    /// Write (or overwrite) the descriptor for `digest`.
    pub async fn put(
        &self,
        digest: &ContentDigest,
        size: u64,
        created_at: DateTime<Utc>,
    ) -> Result<BlobMeta> {
        let meta = BlobMeta::new(digest, size, created_at);
        let json = serde_json::to_vec_pretty(&meta)?;
        write_atomic(&self.staging_dir, &self.meta_path(digest), &json).await?;
        Ok(meta)
    }

    /// Read the descriptor for `digest`; a garbled file is a serialization error.
    pub async fn get(&self, digest: &ContentDigest) -> Result<BlobMeta> {
        let json = match fs::read(self.meta_path(digest)).await {
            Ok(json) => json,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(PpbError::NotFound(digest.to_string()));
            }
            Err(error) => return Err(error.into()),
        };
        Ok(serde_json::from_slice(&json)?)
    }

    fn meta_path(&self, digest: &ContentDigest) -> PathBuf {
        self.meta_dir.join(format!("{}.json", digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash;

    fn open_store() -> (tempfile::TempDir, StorageLayout, MetadataStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let layout = StorageLayout::new(temp_dir.path());
        layout.ensure().unwrap();
        let store = MetadataStore::new(&layout);
        (temp_dir, layout, store)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (_temp_dir, _layout, store) = open_store();
        let hashed = hash(b"hello");
        let created_at = DateTime::<Utc>::from_timestamp_micros(1_700_000_000_123_000).unwrap();

        let written = store.put(&hashed.digest, hashed.size, created_at).await.unwrap();
        assert_eq!(written.short, "2cf24dba5fb0a30e");
        assert_eq!(written.checksum, hashed.digest.as_str());

        let read = store.get(&hashed.digest).await.unwrap();
        assert_eq!(read, written);
    }

    #[tokio::test]
    async fn test_descriptor_wire_format() {
        let (_temp_dir, layout, store) = open_store();
        let hashed = hash(b"hello");
        let created_at = DateTime::<Utc>::from_timestamp(1_700_000_000, 500_000_000).unwrap();
        store.put(&hashed.digest, 5, created_at).await.unwrap();

        let path = layout.meta_dir().join(format!("{}.json", hashed.digest));
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(value["created_at"], serde_json::json!(1_700_000_000.5));
        assert_eq!(value["size"], 5);
        assert_eq!(value["short"], "2cf24dba5fb0a30e");
    }

    #[tokio::test]
    async fn test_written_meta_matches_stored_meta() {
        let (_temp_dir, _layout, store) = open_store();
        let hashed = hash(b"now");

        let written = store.put(&hashed.digest, hashed.size, Utc::now()).await.unwrap();
        assert_eq!(store.get(&hashed.digest).await.unwrap(), written);
    }

    #[tokio::test]
    async fn test_reads_existing_float_descriptor() {
        let (_temp_dir, layout, store) = open_store();
        let hashed = hash(b"hello");
        let json = format!(
            r#"{{"created_at": 1712345678.25, "size": 5, "checksum": "{}", "short": "{}"}}"#,
            hashed.digest,
            hashed.digest.short()
        );
        std::fs::write(
            layout.meta_dir().join(format!("{}.json", hashed.digest)),
            json,
        )
        .unwrap();

        let meta = store.get(&hashed.digest).await.unwrap();
        assert_eq!(meta.created_at.timestamp(), 1_712_345_678);
        assert_eq!(meta.created_at.timestamp_subsec_millis(), 250);
    }

    #[tokio::test]
    async fn test_get_missing_and_garbled() {
        let (_temp_dir, layout, store) = open_store();
        let hashed = hash(b"missing");
        assert!(matches!(
            store.get(&hashed.digest).await,
            Err(PpbError::NotFound(_))
        ));

        std::fs::write(
            layout.meta_dir().join(format!("{}.json", hashed.digest)),
            b"not json",
        )
        .unwrap();
        assert!(matches!(
            store.get(&hashed.digest).await,
            Err(PpbError::Serialization(_))
        ));
    }
}
