// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Ansa Detector Server
 * Control-plane bootstrap: config, store, registries, HTTP listener
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use ansa_detector::api::{self, AppState};
use ansa_detector::config::AppConfig;
use ansa_detector::store::Store;

/// Ansa - Business Logic Anomaly Detector
#[derive(Parser)]
#[command(name = "ansa-detector", version)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address (host:port)
    #[arg(long)]
    listen_addr: Option<String>,

    /// Override the database URL
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    println!("   ___ ____  ___________ _");
    println!("  / _ `/ _ \\/ __/ _ `/ /");
    println!("  \\_,_/_//_/___/\\_,_/_/");
    println!();
    println!("     Ansa - Business Logic Anomaly Detector");
    println!("     v{} - (c) 2026 Bountyy Oy", env!("CARGO_PKG_VERSION"));
    println!();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.listen_addr {
        config.listen_addr = addr;
    }
    if let Some(url) = args.database_url {
        config.database_url = url;
    }

    info!(
        listen_addr = %config.listen_addr,
        database_url = %config.database_url,
        concurrency = config.max_concurrent_requests,
        rate_limit_rps = config.default_rate_limit_rps,
        "starting Ansa detector"
    );

    let store = Store::connect(&config.database_url, config.max_body_bytes)
        .await
        .context("failed to open the store")?;
    store
        .init_schema()
        .await
        .context("failed to initialize the schema")?;
    // Executions left running by a previous process cannot make progress
    store
        .reconcile_stale_executions()
        .await
        .context("failed to reconcile stale executions")?;

    let listen_addr = config.listen_addr.clone();
    let state = AppState::new(config, store)
        .await
        .context("failed to build application state")?;
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", listen_addr))?;
    info!(addr = %listen_addr, "control plane listening");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
