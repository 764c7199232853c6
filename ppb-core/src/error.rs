use thiserror::Error;

#[derive(Error, Debug)]
pub enum PpbError {
    #[error("payload too large: {size} bytes exceeds limit of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("missing or malformed credentials")]
    Unauthorized,

    #[error("invalid token")]
    InvalidToken,

    #[error("ambiguous short hash: {0}")]
    AmbiguousShortHash(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PpbError {
    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TooLarge { .. } => "too_large",
            Self::Unauthorized => "unauthorized",
            Self::InvalidToken => "invalid_token",
            Self::AmbiguousShortHash(_) => "ambiguous_short_hash",
            Self::NotFound(_) => "not_found",
            Self::InvalidDigest(_) => "invalid_digest",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Client errors are terminal and reported verbatim; everything else is a
    /// server-side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::TooLarge { .. }
                | Self::Unauthorized
                | Self::InvalidToken
                | Self::AmbiguousShortHash(_)
                | Self::NotFound(_)
                | Self::InvalidDigest(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PpbError>;
