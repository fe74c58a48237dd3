mod app;
mod auth;
mod cli;
mod error;
mod handlers;
mod model;
mod state;

use crate::app::App;
use crate::auth::TokenSigner;
use crate::cli::{Cli, LogFormat, StorageBackend};
use crate::state::AppState;
use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tinylink_core::Repository;
use tinylink_storage::{FileRepository, InMemoryRepository, PostgresRepository};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse();
    init_tracing(config.log_format);

    let backend = config.storage_backend();
    info!(
        listen_addr = %config.server_address,
        base_url = %config.base_url,
        storage_backend = %backend,
        "starting tinylink server"
    );

    let repository = open_repository(&backend, &config).await?;

    let secret = match &config.secret_key {
        Some(secret) if !secret.is_empty() => secret.clone(),
        _ => {
            warn!("No secret key configured, user cookies will not survive a restart");
            Uuid::new_v4().to_string()
        }
    };

    let state = AppState::new(
        repository.clone(),
        config.base_url.trim_end_matches('/'),
        TokenSigner::new(&secret),
    );

    let listener = tokio::net::TcpListener::bind(config.server_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server_address))?;
    info!(listen_addr = %listener.local_addr()?, "listening");

    let served = axum::serve(listener, App::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    repository.close().await.context("failed to close storage")?;
    info!("server stopped");

    served.context("server error")
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn open_repository(backend: &StorageBackend, config: &Cli) -> anyhow::Result<Arc<dyn Repository>> {
    let repository: Arc<dyn Repository> = match backend {
        StorageBackend::InMemory => Arc::new(InMemoryRepository::new()),
        StorageBackend::File(path) => Arc::new(
            FileRepository::open(path)
                .await
                .with_context(|| format!("failed to open journal {}", path.display()))?,
        ),
        StorageBackend::Postgres(dsn) => Arc::new(
            PostgresRepository::connect(dsn, config.purge_config())
                .await
                .context("failed to connect to postgres")?,
        ),
    };
    Ok(repository)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
