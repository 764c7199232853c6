//! Bearer-token authorization backed by a JSON token list on disk.
//!
//! The token file is a flat JSON array of strings. It is re-read on every
//! authorization check so that tokens appended or removed by other processes
//! take effect on the next request. A missing or garbled file denies
//! everything.

use crate::error::{PpbError, Result};
use crate::storage::write_atomic;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;

/// Token files larger than this are treated as malformed by the gate, and
/// issuance refuses to grow the file past it.
pub const MAX_TOKEN_FILE_BYTES: u64 = 16 * 1024 * 1024;

/// Random bytes per issued token (43 URL-safe base64 characters).
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No credential presented.
    Missing,
    /// Not of the form `Bearer <token>`.
    Malformed,
    /// Well-formed, but not in the current token set.
    UnknownToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    Denied(DenyReason),
}

impl AuthDecision {
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied(DenyReason::Missing | DenyReason::Malformed) => {
                Err(PpbError::Unauthorized)
            }
            Self::Denied(DenyReason::UnknownToken) => Err(PpbError::InvalidToken),
        }
    }
}

/// Extract the token from an `Authorization` header value.
///
/// `Bearer ` followed by nothing yields an empty token, which is never valid.
pub fn parse_bearer(header: &str) -> Option<&str> {
    header.strip_prefix("Bearer ")
}

#[derive(Debug, Clone)]
pub struct TokenGate {
    tokens_path: PathBuf,
}

impl TokenGate {
    pub fn new(tokens_path: impl Into<PathBuf>) -> Self {
        Self {
            tokens_path: tokens_path.into(),
        }
    }

    /// Check an `Authorization` header value against the token file as it
    /// is right now.
    pub async fn authorize(&self, authorization: Option<&str>) -> AuthDecision {
        let Some(header) = authorization else {
            return AuthDecision::Denied(DenyReason::Missing);
        };
        let Some(token) = parse_bearer(header) else {
            return AuthDecision::Denied(DenyReason::Malformed);
        };
        if token.is_empty() {
            return AuthDecision::Denied(DenyReason::UnknownToken);
        }

        let valid_tokens = load_valid_tokens(&self.tokens_path).await;
        if valid_tokens.contains(token) {
            AuthDecision::Allowed
        } else {
            AuthDecision::Denied(DenyReason::UnknownToken)
        }
    }
}

/// Load the current token set; any failure yields an empty set.
pub async fn load_valid_tokens(path: &Path) -> HashSet<String> {
    let entries = match read_token_file(path, Some(MAX_TOKEN_FILE_BYTES)).await {
        Ok(TokenFile::Entries(entries)) => entries,
        Ok(TokenFile::Missing) => {
            tracing::warn!("Tokens file {:?} not found", path);
            return HashSet::new();
        }
        Ok(TokenFile::Garbled(reason)) => {
            tracing::error!("Invalid tokens file {:?}: {}", path, reason);
            return HashSet::new();
        }
        Err(error) => {
            tracing::error!("Failed to load tokens file {:?}: {}", path, error);
            return HashSet::new();
        }
    };

    entries
        .into_iter()
        .filter_map(|entry| entry.as_str().map(str::to_string))
        .collect()
}

/// What the token file currently holds.
enum TokenFile {
    Missing,
    Entries(Vec<serde_json::Value>),
    /// Readable, but not a JSON list.
    Garbled(String),
}

/// Read the token file. I/O failures and files over `max_bytes` are errors;
/// content that is not a JSON list is reported as `Garbled`.
async fn read_token_file(path: &Path, max_bytes: Option<u64>) -> Result<TokenFile> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            return Ok(TokenFile::Missing);
        }
        Err(error) => return Err(error.into()),
    };

    let mut buffer = Vec::new();
    match max_bytes {
        Some(max_bytes) => {
            file.take(max_bytes + 1).read_to_end(&mut buffer).await?;
            if buffer.len() as u64 > max_bytes {
                return Err(PpbError::Config(format!(
                    "tokens file exceeds {} bytes",
                    max_bytes
                )));
            }
        }
        None => {
            file.read_to_end(&mut buffer).await?;
        }
    }

    Ok(match serde_json::from_slice::<serde_json::Value>(&buffer) {
        Ok(serde_json::Value::Array(entries)) => TokenFile::Entries(entries),
        Ok(_) => TokenFile::Garbled("not a JSON list".to_string()),
        Err(error) => TokenFile::Garbled(error.to_string()),
    })
}

/// Appends freshly generated tokens to the token file.
#[derive(Debug)]
pub struct TokenIssuer {
    tokens_path: PathBuf,
    write_lock: Mutex<()>,
}

impl TokenIssuer {
    pub fn new(tokens_path: impl Into<PathBuf>) -> Self {
        Self {
            tokens_path: tokens_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Generate a new token, append it to the token file and return it.
    ///
    /// A file that is not a JSON list is replaced by a list holding only the
    /// new token. Read failures, and a result that would exceed
    /// `MAX_TOKEN_FILE_BYTES`, leave the file untouched and return an error.
    pub async fn issue(&self) -> Result<String> {
        let _guard = self.write_lock.lock().await;

        let mut entries = match read_token_file(&self.tokens_path, None).await? {
            TokenFile::Entries(entries) => entries,
            TokenFile::Missing => Vec::new(),
            TokenFile::Garbled(reason) => {
                tracing::warn!(
                    "Replacing invalid tokens file {:?}: {}",
                    self.tokens_path,
                    reason
                );
                Vec::new()
            }
        };

        let token = generate_token();
        entries.push(serde_json::Value::String(token.clone()));

        let json = serde_json::to_vec_pretty(&entries)?;
        if json.len() as u64 > MAX_TOKEN_FILE_BYTES {
            return Err(PpbError::Config(format!(
                "tokens file would exceed {} bytes",
                MAX_TOKEN_FILE_BYTES
            )));
        }

        let parent = match self.tokens_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&parent).await?;
        write_atomic(&parent, &self.tokens_path, &json).await?;

        tracing::info!("Issued new token ({} tokens on file)", entries.len());
        Ok(token)
    }
}

/// An unguessable URL-safe token.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bearer(token: &str) -> String {
        format!("Bearer {}", token)
    }

    #[test]
    fn test_parse_bearer() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("Bearer "), Some(""));
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("bearer abc"), None);
    }

    #[test]
    fn test_generate_token_is_url_safe_and_unique() {
        let first = generate_token();
        let second = generate_token();
        assert_eq!(first.len(), 43);
        assert!(
            first
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_authorize_against_token_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tokens.json");
        std::fs::write(&path, r#"["alpha", "beta"]"#).unwrap();
        let gate = TokenGate::new(&path);

        assert_eq!(
            gate.authorize(Some(&bearer("alpha"))).await,
            AuthDecision::Allowed
        );
        assert_eq!(
            gate.authorize(None).await,
            AuthDecision::Denied(DenyReason::Missing)
        );
        assert_eq!(
            gate.authorize(Some("alpha")).await,
            AuthDecision::Denied(DenyReason::Malformed)
        );
        assert_eq!(
            gate.authorize(Some(&bearer("gamma"))).await,
            AuthDecision::Denied(DenyReason::UnknownToken)
        );
        assert_eq!(
            gate.authorize(Some("Bearer ")).await,
            AuthDecision::Denied(DenyReason::UnknownToken)
        );
    }

    #[tokio::test]
    async fn test_token_changes_apply_without_restart() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tokens.json");
        std::fs::write(&path, r#"["alpha"]"#).unwrap();
        let gate = TokenGate::new(&path);

        assert!(matches!(
            gate.authorize(Some(&bearer("late"))).await,
            AuthDecision::Denied(_)
        ));

        std::fs::write(&path, r#"["late"]"#).unwrap();
        assert_eq!(
            gate.authorize(Some(&bearer("late"))).await,
            AuthDecision::Allowed
        );
        assert_eq!(
            gate.authorize(Some(&bearer("alpha"))).await,
            AuthDecision::Denied(DenyReason::UnknownToken)
        );
    }

    #[tokio::test]
    async fn test_malformed_token_file_fails_closed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tokens.json");
        let gate = TokenGate::new(&path);

        assert_eq!(
            gate.authorize(Some(&bearer("alpha"))).await,
            AuthDecision::Denied(DenyReason::UnknownToken)
        );

        std::fs::write(&path, "{not json").unwrap();
        assert!(load_valid_tokens(&path).await.is_empty());

        std::fs::write(&path, r#"{"tokens": ["alpha"]}"#).unwrap();
        assert!(load_valid_tokens(&path).await.is_empty());

        std::fs::write(&path, r#"["alpha", 42, null]"#).unwrap();
        let tokens = load_valid_tokens(&path).await;
        assert_eq!(tokens.len(), 1);
        assert!(tokens.contains("alpha"));
    }

    #[tokio::test]
    async fn test_decision_maps_to_errors() {
        assert!(AuthDecision::Allowed.into_result().is_ok());
        assert!(matches!(
            AuthDecision::Denied(DenyReason::Malformed).into_result(),
            Err(PpbError::Unauthorized)
        ));
        assert!(matches!(
            AuthDecision::Denied(DenyReason::UnknownToken).into_result(),
            Err(PpbError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn test_issued_tokens_are_accepted() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("tokens.json");
        let issuer = TokenIssuer::new(&path);
        let gate = TokenGate::new(&path);

        let first = issuer.issue().await.unwrap();
        let second = issuer.issue().await.unwrap();

        assert_eq!(
            gate.authorize(Some(&bearer(&first))).await,
            AuthDecision::Allowed
        );
        assert_eq!(
            gate.authorize(Some(&bearer(&second))).await,
            AuthDecision::Allowed
        );
        assert_eq!(load_valid_tokens(&path).await.len(), 2);
    }

    #[tokio::test]
    async fn test_issue_replaces_garbled_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tokens.json");
        std::fs::write(&path, "garbage").unwrap();

        let token = TokenIssuer::new(&path).issue().await.unwrap();
        let entries: Vec<String> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(entries, vec![token]);
    }

    #[tokio::test]
    async fn test_issue_resets_non_list_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tokens.json");
        std::fs::write(&path, r#"{"tokens": ["alpha"]}"#).unwrap();

        let token = TokenIssuer::new(&path).issue().await.unwrap();
        let entries: Vec<String> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(entries, vec![token]);
    }

    #[tokio::test]
    async fn test_issue_appends_to_large_token_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tokens.json");
        let existing: Vec<String> = (0..30_000).map(|i| format!("token-{:040}", i)).collect();
        std::fs::write(&path, serde_json::to_vec(&existing).unwrap()).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 1024 * 1024);

        let token = TokenIssuer::new(&path).issue().await.unwrap();

        let entries: Vec<String> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(entries.len(), 30_001);
        assert_eq!(entries[..30_000], existing[..]);
        assert_eq!(entries[30_000], token);

        let gate = TokenGate::new(&path);
        assert_eq!(
            gate.authorize(Some(&bearer(&existing[0]))).await,
            AuthDecision::Allowed
        );
    }

    #[tokio::test]
    async fn test_issue_keeps_oversized_file_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("tokens.json");
        let oversized = format!(r#"["{}"]"#, "a".repeat(MAX_TOKEN_FILE_BYTES as usize));
        std::fs::write(&path, &oversized).unwrap();

        let result = TokenIssuer::new(&path).issue().await;
        assert!(matches!(result, Err(PpbError::Config(_))));
        assert_eq!(std::fs::read(&path).unwrap(), oversized.as_bytes());
    }

    #[tokio::test]
    async fn test_issue_fails_on_unreadable_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        // A directory in place of the token file makes the read fail.
        let path = temp_dir.path().join("tokens.json");
        std::fs::create_dir(&path).unwrap();

        let result = TokenIssuer::new(&path).issue().await;
        assert!(matches!(result, Err(PpbError::Io(_))));
        assert!(path.is_dir());
    }
}
