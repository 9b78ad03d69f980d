use anyhow::Result;
use axum::Router;
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use config::{AppConfig, Command};
use services::{
    asset_store::{AssetStore, StoreSettings},
    importer,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting asset-store with config: {:?}", cfg);

    // --- Initialize SQLite connection + schema ---
    let db = db::connect(&cfg.database_url).await?;
    db::run_migrations(&db).await?;

    if command == Command::Migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service ---
    let store = AssetStore::new(
        db.clone(),
        StoreSettings {
            chunk_size: cfg.chunk_size,
            verify_hash: cfg.verify_hash,
            buckets: cfg.buckets.clone(),
        },
    );
    let buckets = store.init().await?;

    match command {
        Command::Migrate => Ok(()),
        Command::Import {
            metadata,
            recommended_folder,
        } => {
            let summary =
                importer::import_all(&store, &metadata, &cfg.assets_dir, &recommended_folder)
                    .await?;
            tracing::info!(
                linked = summary.linked,
                raw = summary.raw,
                skipped = summary.skipped,
                "Import finished"
            );
            Ok(())
        }
        Command::Sweep {
            older_than_secs,
            bucket,
        } => {
            let targets = match bucket {
                Some(name) => vec![store.buckets.get_bucket(&name).await?],
                None => buckets,
            };
            let grace = chrono::Duration::seconds(older_than_secs);
            let mut reclaimed = 0;
            for bucket in &targets {
                reclaimed += store.sweep_orphans(bucket, grace).await?;
            }
            tracing::info!("Sweep reclaimed {} chunks", reclaimed);
            Ok(())
        }
        Command::Serve => serve(&cfg, store).await,
    }
}

async fn serve(cfg: &AppConfig, store: AssetStore) -> Result<()> {
    // --- Build router ---
    let app: Router = routes::routes::routes(&cfg.assets_dir)
        .with_state(store)
        .layer(TraceLayer::new_for_http());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
