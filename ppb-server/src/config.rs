use ppb_core::{MAX_SIZE, PpbError, Result, StorageLayout};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_tokens_path")]
    pub tokens_path: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Base address for retrieval links; derived from the `Host` header when unset.
    #[serde(default)]
    pub public_url: Option<String>,
    /// When set, `POST /token` requires `Authorization: Bearer <admin_token>`.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Allow anyone to mint tokens when no admin token is configured.
    #[serde(default)]
    pub open_token_issuance: bool,
}

fn default_bind_addr() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_tokens_path() -> PathBuf {
    PathBuf::from("tokens.json")
}

fn default_max_upload_bytes() -> u64 {
    MAX_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            data_dir: default_data_dir(),
            tokens_path: default_tokens_path(),
            max_upload_bytes: default_max_upload_bytes(),
            public_url: None,
            admin_token: None,
            open_token_issuance: false,
        }
    }
}

/// How `POST /token` is guarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenIssuancePolicy {
    Admin(String),
    Open,
    Disabled,
}

impl ServerConfig {
    /// Load settings from an optional file overlaid with `PPB_*` environment
    /// variables.
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path).required(false))
            .add_source(::config::Environment::with_prefix("PPB"))
            .build()
            .map_err(|e| PpbError::Config(e.to_string()))?;

        let config: ServerConfig = settings
            .try_deserialize()
            .map_err(|e| PpbError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.trim().is_empty() {
            return Err(PpbError::Config("bind_addr cannot be empty".to_string()));
        }
        if self.max_upload_bytes > usize::MAX as u64 {
            return Err(PpbError::Config(format!(
                "max_upload_bytes {} does not fit in memory on this platform",
                self.max_upload_bytes
            )));
        }
        if let Some(admin_token) = &self.admin_token {
            if admin_token.trim().is_empty() {
                return Err(PpbError::Config("admin_token cannot be empty".to_string()));
            }
        }
        Ok(())
    }

    pub fn layout(&self) -> StorageLayout {
        StorageLayout::new(&self.data_dir)
    }

    pub fn token_issuance_policy(&self) -> TokenIssuancePolicy {
        match &self.admin_token {
            Some(admin_token) => TokenIssuancePolicy::Admin(admin_token.clone()),
            None if self.open_token_issuance => TokenIssuancePolicy::Open,
            None => TokenIssuancePolicy::Disabled,
        }
    }
}
