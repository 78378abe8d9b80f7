//! geofact-engine - Geospatial Authority Resolution Engine
//!
//! Resolves utility-provider and address facts for a coordinate or street
//! address by cascading through authoritative sources in priority order.
//! Serves an HTTP API on port 5810 by default.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use geofact_common::config::TomlConfig;
use geofact_engine::engine::build_engine;
use geofact_engine::AppState;

#[derive(Parser, Debug)]
#[command(name = "geofact-engine", version, about = "Geospatial fact resolution service")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(long, env = "GEOFACT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();

    info!("Starting geofact-engine");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = TomlConfig::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let db_path = config.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = geofact_engine::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    let bind = format!("{}:{}", config.server.bind, config.server.port);
    let engine = build_engine(config, db_pool.clone());
    let state = AppState::new(std::sync::Arc::new(engine), db_pool);

    let app = geofact_engine::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
