//! ppb Core - content-addressed blob storage
//!
//! - SHA256 content addressing with 16-character short identifiers
//! - one payload file and one JSON descriptor per distinct content
//! - atomic temp-file + rename publishing
//! - bearer tokens checked against a token list re-read on every request

pub mod error;
pub mod hash;
pub mod operations;
pub mod resolver;
pub mod storage;
pub mod token_gate;

pub use error::{PpbError, Result};
pub use hash::{ContentDigest, DIGEST_LEN, Hashed, SHORT_LEN, hash};
pub use operations::{
    ReadBlobOperation, ReadBlobOperationOutcome, ReadBlobOperationRequest, ReadBlobOperationResult,
    SaveBlobOperation, SaveBlobOperationOutcome, SaveBlobOperationRequest, SaveBlobOperationResult,
};
pub use resolver::{Resolution, ShortHashResolver};
pub use storage::blob_store::MAX_SIZE;
pub use storage::{BlobMeta, BlobStore, MetadataStore, PutBlobOutcome, StorageLayout};
pub use token_gate::{AuthDecision, DenyReason, TokenGate, TokenIssuer};
