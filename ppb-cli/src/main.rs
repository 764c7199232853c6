mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::{ClientConfig, Overrides, Settings, home_config_path, locate_config, resolve_settings};
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::AsyncReadExt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Upload stdin to a ppb server.
///
/// Precedence: CLI > env (PPB_URL, PPB_TOKEN) > config > defaults.
/// Config files are checked in order: .ppb-config.json, ~/.ppb/config.json.
#[derive(Parser, Debug)]
#[command(name = "ppb")]
#[command(after_help = "Example:\n  cat file.txt | ppb --server prod --response")]
struct Cli {
    /// Override server URL
    #[arg(short, long)]
    url: Option<String>,

    /// Override auth token
    #[arg(short, long)]
    token: Option<String>,

    /// Use server config by name
    #[arg(short, long)]
    server: Option<String>,

    /// Use custom config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write default config then exit
    #[arg(long)]
    init_config: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Show server response
    #[arg(short, long)]
    response: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "ppb=debug" } else { "ppb=warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .without_time()
                .with_target(false),
        )
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error: {:#}", error);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let home = dirs::home_dir();
    let cwd = std::env::current_dir().context("failed to resolve current directory")?;
    let config_path = locate_config(cli.config.as_deref(), &cwd, home.as_deref());

    if cli.init_config {
        let path = config_path
            .context("no config path resolved; use --config to specify one")?;
        if path.exists() {
            tracing::debug!("Config already exists at {}", path.display());
        } else {
            ClientConfig::write_default(&path)?;
            tracing::debug!("Created default config at {}", path.display());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = match &config_path {
        Some(path) => {
            let is_home_default = home
                .as_deref()
                .is_some_and(|home| *path == home_config_path(home));
            if is_home_default && !path.exists() {
                match ClientConfig::write_default(path) {
                    Ok(()) => tracing::debug!("Created default config at {}", path.display()),
                    Err(error) => tracing::debug!("Could not create default config: {:#}", error),
                }
            }

            tracing::debug!("Loading config from {}", path.display());
            match ClientConfig::load(path) {
                Ok(config) => Some(config),
                Err(error) => {
                    tracing::debug!("Ignoring config: {:#}", error);
                    None
                }
            }
        }
        None => None,
    };

    let env = Overrides {
        url: std::env::var("PPB_URL").ok(),
        token: std::env::var("PPB_TOKEN").ok(),
    };
    let flags = Overrides {
        url: cli.url.clone(),
        token: cli.token.clone(),
    };
    let settings = resolve_settings(config.as_ref(), cli.server.as_deref(), &env, &flags);

    tracing::debug!("URL: {}", settings.url);
    tracing::debug!(
        "Token: {}",
        if settings.token.is_empty() { "(not set)" } else { "***" }
    );

    if settings.token.is_empty() {
        anyhow::bail!("token is not set. Use --token, PPB_TOKEN, or config file.");
    }

    let mut body = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut body)
        .await
        .context("failed to read stdin")?;

    upload(&settings, body, cli.response).await
}

async fn upload(settings: &Settings, body: Vec<u8>, show_response: bool) -> Result<ExitCode> {
    tracing::debug!("Uploading {} bytes", body.len());

    let response = reqwest::Client::new()
        .post(&settings.url)
        .bearer_auth(&settings.token)
        .header(CONTENT_TYPE, "application/octet-stream")
        .body(body)
        .send()
        .await
        .context("upload failed")?;

    let status = response.status();
    tracing::debug!("HTTP Status: {}", status.as_u16());

    let text = response
        .text()
        .await
        .context("failed to read server response")?;
    if show_response && !text.is_empty() {
        println!("{}", text);
    }

    if status.is_success() {
        tracing::debug!("Upload successful");
        return Ok(ExitCode::SUCCESS);
    }

    if status == StatusCode::UNAUTHORIZED {
        eprintln!("Error: unauthorized (401) - invalid token");
    } else {
        eprintln!("Error: server responded with {}", status);
    }
    Ok(ExitCode::FAILURE)
}
