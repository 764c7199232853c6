mod config;
mod server;

use clap::{Parser, Subcommand};
use config::ServerConfig;
use ppb_core::TokenIssuer;
use server::run_server;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "ppb-server")]
#[command(about = "Content-addressed paste and blob store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "ppb.toml")]
        config: String,
    },
    /// Append a new upload token to the token file and print it
    Token {
        /// Path to configuration file
        #[arg(short, long, default_value = "ppb.toml")]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ppb_server=info,ppb_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            tracing::info!("Starting ppb server with config: {}", config);
            let cfg = load_config(&config);

            tracing::info!(
                "Bind: {}, data dir: {:?}, tokens: {:?}, max upload: {} bytes",
                cfg.bind_addr,
                cfg.data_dir,
                cfg.tokens_path,
                cfg.max_upload_bytes
            );

            if let Err(e) = run_server(cfg).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Token { config } => {
            let cfg = load_config(&config);
            match TokenIssuer::new(&cfg.tokens_path).issue().await {
                Ok(token) => println!("{}", token),
                Err(e) => {
                    tracing::error!("Failed to issue token: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }
}

fn load_config(path: &str) -> ServerConfig {
    match ServerConfig::from_file(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}
