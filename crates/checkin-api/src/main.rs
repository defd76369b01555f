//! Check-in API Server
//!
//! Author: hephaex@gmail.com

use anyhow::Context;
use checkin_api::auth::{MokaRevocationStore, PasswordConfig, PgRevocationStore, RevocationStore};
use checkin_api::create_router;
use checkin_api::state::{AppState, Stores};
use checkin_core::config::{AppConfig, LoggingConfig, DEVELOPMENT_JWT_SECRET};
use checkin_core::{PgStore, RevocationBackend};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Path of an optional TOML config file; environment variables still win
const CONFIG_PATH_VAR: &str = "CHECKIN_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_tracing(&config.logging);

    if config.auth.jwt_secret == DEVELOPMENT_JWT_SECRET {
        tracing::warn!("JWT_SECRET not set; using the development secret");
    }

    let stores = build_stores(&config).await?;
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = Arc::new(AppState::new(config, stores, PasswordConfig::default()));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Check-in API Server starting on http://{}", addr);
    tracing::info!("OpenAPI spec at http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn load_config() -> anyhow::Result<AppConfig> {
    let config = match std::env::var(CONFIG_PATH_VAR) {
        Ok(path) => AppConfig::from_file(&path)?.with_env_override()?,
        Err(_) => AppConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "checkin_api={level},checkin_core={level},audit=info,tower_http=info",
            level = logging.level
        ))
    });

    if logging.json_format {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_stores(config: &AppConfig) -> anyhow::Result<Stores> {
    let Some(url) = config.database.postgres_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; running on in-memory storage, data is lost on restart");
        return Ok(Stores::in_memory());
    };

    let timeout = config.database.store_timeout();
    let db = PgStore::connect(url, config.database.pool_size, timeout)
        .await
        .context("Failed to connect to PostgreSQL")?;
    db.migrate().await.context("Failed to apply schema")?;
    tracing::info!("Connected to PostgreSQL");

    let revocations: Arc<dyn RevocationStore> = match config.auth.revocation_backend {
        RevocationBackend::Postgres => {
            let store = Arc::new(PgRevocationStore::new(db.pool().clone(), timeout));
            store.clone().spawn_sweeper(Duration::from_secs(
                config.auth.revocation_sweep_interval_secs.max(1),
            ));
            store
        }
        RevocationBackend::Memory => {
            tracing::warn!("Revocations are held in process memory and lost on restart");
            Arc::new(MokaRevocationStore::new())
        }
    };

    let db_store = Arc::new(db.clone());
    Ok(Stores {
        principals: db_store.clone(),
        events: db_store.clone(),
        check_ins: db_store,
        revocations,
        database: Some(db),
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}
