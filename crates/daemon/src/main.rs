//! Pommel binary — thin CLI shell over the [`pommel_daemon`] library crate.

use clap::Parser;
use pommel_core::{CancellationToken, Config};
use pommel_daemon::Daemon;
use std::path::PathBuf;
use tracing::error;

/// Per-project background daemon maintaining a live semantic index of a source tree.
#[derive(Parser)]
#[command(name = "pommel", version, about, long_about = None)]
struct Cli {
    /// Project root directory (default: current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Bind to 0.0.0.0 instead of 127.0.0.1 (localhost)
    #[arg(long)]
    bind_all: bool,

    /// Override the deterministically hashed port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("pommel=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let project_root = cli.root.clone().unwrap_or_else(|| std::env::current_dir().unwrap());
    let project_root = project_root.canonicalize().unwrap_or_else(|e| {
        error!(path = %project_root.display(), error = %e, "project root not found");
        std::process::exit(1);
    });

    let mut config = Config::load(&project_root).unwrap_or_else(|e| {
        error!(code = e.code(), error = %e, "failed to load configuration");
        std::process::exit(1);
    });
    if config.embedding_dimension.is_none() {
        config.embedding_dimension = Some(384);
    }
    if cli.bind_all {
        config.bind_host = Some("0.0.0.0".to_string());
    }
    if let Some(port) = cli.port {
        config.port = Some(port);
    }

    let mut daemon = Daemon::new(project_root, config).unwrap_or_else(|e| {
        error!(code = e.code(), error = %e, "failed to initialize daemon");
        std::process::exit(1);
    });

    if let Err(e) = daemon.run(CancellationToken::new()).await {
        error!(code = e.code(), error = %e, "daemon exited with an error");
        std::process::exit(1);
    }
}
