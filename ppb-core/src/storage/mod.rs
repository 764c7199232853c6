//! Storage modules for ppb
//!
//! Provides the on-disk layout, content-addressed blob storage and metadata
//! descriptors.

pub mod blob_store;
pub mod layout;
pub mod metadata_store;

pub use blob_store::{BlobStore, PutBlobOutcome};
pub use layout::{StorageLayout, write_atomic};
pub use metadata_store::{BlobMeta, MetadataStore};
