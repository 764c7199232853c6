use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_URL: &str = "https://epa.st/upload";

/// Config files larger than this are ignored.
const MAX_CONFIG_BYTES: u64 = 64 * 1024;

const LOCAL_CONFIG: &str = ".ppb-config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub default_server: Option<String>,
    #[serde(default)]
    pub default_token: Option<String>,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut servers = BTreeMap::new();
        servers.insert(
            "local".to_string(),
            ServerEntry {
                url: Some("http://127.0.0.1:5000".to_string()),
                token: Some(String::new()),
            },
        );

        Self {
            default_server: Some(DEFAULT_URL.to_string()),
            default_token: Some(String::new()),
            servers,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let size = std::fs::metadata(path)
            .with_context(|| format!("config not readable at {}", path.display()))?
            .len();
        if size > MAX_CONFIG_BYTES {
            anyhow::bail!("config at {} exceeds {} bytes", path.display(), MAX_CONFIG_BYTES);
        }

        let json = std::fs::read(path)
            .with_context(|| format!("config not readable at {}", path.display()))?;
        serde_json::from_slice(&json)
            .with_context(|| format!("config at {} is invalid JSON", path.display()))
    }

    /// Write the default config with owner-only permissions.
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for {}", path.display())
            })?;
        }

        let json = serde_json::to_vec_pretty(&ClientConfig::default())?;
        std::fs::write(path, json)
            .with_context(|| format!("could not write default config to {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }
}

/// `~/.ppb/config.json`.
pub fn home_config_path(home: &Path) -> PathBuf {
    home.join(".ppb").join("config.json")
}

/// Pick the config file: explicit path, then `.ppb-config.json` in `cwd`,
/// then the home config (returned even when it does not exist yet).
pub fn locate_config(custom: Option<&Path>, cwd: &Path, home: Option<&Path>) -> Option<PathBuf> {
    if let Some(custom) = custom {
        return Some(custom.to_path_buf());
    }

    let local = cwd.join(LOCAL_CONFIG);
    if local.exists() {
        return Some(local);
    }

    home.map(home_config_path)
}

/// Values coming from one precedence layer.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub url: String,
    pub token: String,
}

/// Merge layers: CLI > env > config > defaults.
///
/// With `server_name` the config contributes that named entry; otherwise its
/// `default_server`/`default_token`.
pub fn resolve_settings(
    config: Option<&ClientConfig>,
    server_name: Option<&str>,
    env: &Overrides,
    cli: &Overrides,
) -> Settings {
    let mut settings = Settings {
        url: DEFAULT_URL.to_string(),
        token: String::new(),
    };

    if let Some(config) = config {
        let (url, token) = match server_name {
            Some(name) => match config.servers.get(name) {
                Some(entry) => (entry.url.clone(), entry.token.clone()),
                None => (None, None),
            },
            None => (config.default_server.clone(), config.default_token.clone()),
        };
        apply(&mut settings, url, token);
    }

    apply(&mut settings, env.url.clone(), env.token.clone());
    apply(&mut settings, cli.url.clone(), cli.token.clone());
    settings
}

fn apply(settings: &mut Settings, url: Option<String>, token: Option<String>) {
    if let Some(url) = url {
        settings.url = url;
    }
    if let Some(token) = token {
        settings.token = token;
    }
}
