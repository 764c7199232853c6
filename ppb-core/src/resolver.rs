use crate::error::Result;
use crate::hash::{ContentDigest, DIGEST_LEN, SHORT_LEN, is_hex};
use crate::storage::BlobStore;

/// How an identifier maps onto stored blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Exact(ContentDigest),
    Prefix(ContentDigest),
    NotFound,
    Ambiguous,
}

/// Resolves full or abbreviated identifiers against the blob key space.
///
/// An exact digest match always wins. Identifiers of at most 16 characters
/// are then tried as prefixes; longer identifiers that miss are final.
#[derive(Debug, Clone)]
pub struct ShortHashResolver {
    blob_store: BlobStore,
}

impl ShortHashResolver {
    pub fn new(blob_store: BlobStore) -> Self {
        Self { blob_store }
    }

    pub async fn resolve(&self, identifier: &str) -> Result<Resolution> {
        if identifier.is_empty() || !is_hex(identifier) {
            return Ok(Resolution::NotFound);
        }
        let identifier = identifier.to_ascii_lowercase();

        if identifier.len() == DIGEST_LEN {
            let digest = ContentDigest::from_str_checked(&identifier)?;
            if self.blob_store.exists(&digest).await {
                return Ok(Resolution::Exact(digest));
            }
        }

        if identifier.len() > SHORT_LEN {
            return Ok(Resolution::NotFound);
        }

        let mut matches = self.blob_store.digests_with_prefix(&identifier, 2).await?;
        match matches.len() {
            0 => Ok(Resolution::NotFound),
            1 => Ok(Resolution::Prefix(matches.remove(0))),
            _ => {
                tracing::warn!("Ambiguous short hash: {}", identifier);
                Ok(Resolution::Ambiguous)
            }
        }
    }
}
