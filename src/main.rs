use anyhow::{Context, Result};
use clap::Parser;
use std::{fs, path::Path, sync::Arc};
use tokio::{io::AsyncReadExt, net::TcpListener};
use tracing_subscriber::EnvFilter;

mod client;
mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use config::{Cli, ClientConfig, Command, ServerConfig, UploadArgs};
use services::{
    expiry_scheduler::ExpiryScheduler,
    storage_service::{StorageService, open_catalog},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    // stdout is reserved for the share URL printed by `upload`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => {
            let cfg = ServerConfig::from_env_and_args(cli.addr, cli.token, args)?;
            serve(cfg).await
        }
        Command::Upload(args) => {
            let cfg = ClientConfig::from_env_and_args(cli.addr, cli.token);
            upload(cfg, args).await
        }
    }
}

async fn serve(cfg: ServerConfig) -> Result<()> {
    tracing::info!(
        addr = %cfg.addr,
        database_url = %cfg.database_url,
        upload_dir = %cfg.upload_dir,
        max_upload_size = cfg.max_upload_size,
        sweep_interval = ?cfg.sweep_interval,
        default_lifetime = ?cfg.default_lifetime,
        "Starting fling"
    );
    if cfg.token.is_empty() {
        tracing::warn!("no upload token configured; anyone can upload");
    }

    // --- Initialize SQLite catalog ---
    ensure_database_parent(&cfg.database_url)?;
    let db = open_catalog(&cfg.database_url)
        .await
        .with_context(|| format!("opening catalog {}", cfg.database_url))?;

    // --- Initialize core service ---
    let storage = StorageService::new(Arc::new(db), &cfg.upload_dir);
    storage
        .init()
        .await
        .context("initializing upload directory and catalog")?;
    let scheduler = ExpiryScheduler::spawn(storage.clone(), cfg.sweep_interval);

    // --- Build router ---
    let state = state::AppState::new(storage.clone(), &cfg.token, cfg.default_lifetime);
    let app = routes::routes::routes(cfg.max_upload_size).with_state(state);

    // --- Start server ---
    let listener = TcpListener::bind(&cfg.addr)
        .await
        .with_context(|| format!("binding {}", cfg.addr))?;

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // --- Shutdown: stop sweeping, then release the catalog ---
    scheduler.shutdown().await;
    storage.close().await;
    tracing::info!("Shutdown complete");

    served.context("server error")
}

async fn upload(cfg: ClientConfig, args: UploadArgs) -> Result<()> {
    let content = if args.file == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("reading stdin")?;
        buf
    } else {
        tokio::fs::read(&args.file)
            .await
            .with_context(|| format!("reading {}", args.file))?
    };

    let client = client::Client::new(&cfg.addr, cfg.token)?;
    let object = client.upload(content, &args.file, &args.duration).await?;
    println!("{}", client.url(&object));
    Ok(())
}

/// SQLite creates the database file but not its directory.
fn ensure_database_parent(database_url: &str) -> Result<()> {
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();
    if db_path.is_empty() || db_path.starts_with(":memory:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating catalog directory {}", parent.display()))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT, shutting down...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{SignalKind, signal};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(err) => {
                        tracing::warn!("SIGTERM handler unavailable: {}", err);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
