//! GapOps API server
//!
//! ## Usage
//!
//! ```bash
//! # Apply the schema once
//! psql $DATABASE_URL -f sql/migrations/001_gapops_schema.sql
//!
//! # Start the server
//! DATABASE_URL=postgresql://localhost/gapops \
//! SESSION_SECRET=change-me \
//! cargo run --bin gapops_server
//! ```
//!
//! Optional subsystems degrade gracefully: without `OPENAI_API_KEY` gaps
//! skip similarity scoring but still advance to review; without
//! `SMTP_URL`/`SMTP_FROM` notifications stay on the socket and audit
//! channels.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tower_sessions::cookie::Key;
use tower_sessions::SessionManagerLayer;
use tower_sessions_sqlx_store::PostgresStore;
use tracing::info;

use gapops::ai::openai::OpenAiClient;
use gapops::ai::{enricher, SimilarityProvider};
use gapops::api::build_router;
use gapops::config::AppConfig;
use gapops::database::{DatabaseConfig, DatabaseManager};
use gapops::events::EventBus;
use gapops::notify::{self, Mailer};
use gapops::realtime::RealtimeHub;
use gapops::scheduler;
use gapops::state::AppState;

/// Derive the 64-byte cookie signing key from the configured secret.
fn signing_key(secret: &str) -> Key {
    let mut material = [0u8; 64];
    let first = Sha256::digest(format!("{secret}:cookie:1"));
    let second = Sha256::digest(format!("{secret}:cookie:2"));
    material[..32].copy_from_slice(&first);
    material[32..].copy_from_slice(&second);
    Key::from(&material)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gapops=info,tower_http=info".into()),
        )
        .init();

    // Missing required configuration exits non-zero here.
    let config = Arc::new(AppConfig::from_env()?);

    let manager = DatabaseManager::new(DatabaseConfig::new(&config.database_url)).await?;
    manager.test_connection().await?;
    manager.verify_schema().await?;
    let pool = manager.pool().clone();

    let session_store = PostgresStore::new(pool.clone());
    session_store.migrate().await?;
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_signed(signing_key(&config.session_secret));

    let bus = EventBus::default();
    let hub = RealtimeHub::new();

    let provider: Option<Arc<dyn SimilarityProvider>> = match OpenAiClient::new(&config.ai) {
        Ok(client) => {
            info!(model = %config.ai.model, "AI provider configured");
            Some(Arc::new(client))
        }
        Err(_) => None,
    };

    let (enricher_queue, enricher_handle) =
        enricher::spawn(pool.clone(), provider, config.ai.clone(), bus.clone());

    let mailer = Mailer::from_settings(&config.email);
    let notifier_handle = notify::spawn(pool.clone(), mailer, hub.clone(), &bus);
    let scheduler_handle = scheduler::spawn(pool.clone(), config.scheduler.clone(), bus.clone());

    let state = AppState::new(config.clone(), pool, bus, hub.clone(), enricher_queue);
    let app = build_router(state, session_layer);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!(addr = %config.bind_addr, "gapops server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // Ordered teardown: sockets, then workers, then the pool.
    hub.close_all();
    enricher_handle.abort();
    notifier_handle.abort();
    scheduler_handle.abort();
    manager.close().await;

    info!("gapops server stopped");
    Ok(())
}
