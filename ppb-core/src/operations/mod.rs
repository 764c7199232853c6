pub mod read_blob;
pub mod save_blob;

pub use read_blob::{
    ReadBlobOperation, ReadBlobOperationOutcome, ReadBlobOperationRequest, ReadBlobOperationResult,
};
pub use save_blob::{
    SaveBlobOperation, SaveBlobOperationOutcome, SaveBlobOperationRequest, SaveBlobOperationResult,
    retrieval_url,
};
