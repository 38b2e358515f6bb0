//! prefsync-server: HTTP server for settings sync
//!
//! Usage:
//!   prefsync-server --auth-file auth.json
//!   prefsync-server --auth-file auth.json --database ./settings.redb --port 8080

use clap::Parser;
use prefsync::auth::TokenAuthenticator;
use prefsync::cli::ServerArgs;
use prefsync::config::AuthConfig;
use prefsync::store::{MemoryStore, RedbStore, SettingsStore};
use prefsync::timestamp::SystemClock;
use prefsync::{create_router_with_config, RouterConfig};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ServerArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let auth = match AuthConfig::load(&args.auth_file) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("[server] Failed to load auth file {:?}: {}", args.auth_file, e);
            std::process::exit(1);
        }
    };
    let auth = TokenAuthenticator::from(auth);
    tracing::info!("[server] Loaded {} token(s)", auth.len());

    let store: Arc<dyn SettingsStore> = match args.database {
        Some(ref path) => Arc::new(RedbStore::open(path)?),
        None => {
            tracing::warn!("[server] No --database given, settings will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let app = create_router_with_config(RouterConfig {
        store,
        auth: Arc::new(auth),
        clock: Arc::new(SystemClock),
    });

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("[server] Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            tracing::info!("[server] Received Ctrl+C");
        })
        .await?;

    tracing::info!("[server] Shutdown complete");
    Ok(())
}
