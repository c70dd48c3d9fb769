use std::sync::Arc;

use contact_link::{
    config,
    store::{DocumentStore, MemoryStore, SqliteStore},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (ignore error if file is absent — env vars may already be set)
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "contact_link=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = config::AppConfig::from_env()?;
    tracing::info!("Starting contact-link on {}:{}", config.host, config.port);
    tracing::info!(
        "Link policy: {}, calendar offset: {}",
        config.link_policy,
        config.calendar_offset
    );

    // Open the document store
    let store: Arc<dyn DocumentStore> = if config.uses_memory_store() {
        tracing::warn!("Using the in-memory store; nothing will be persisted");
        Arc::new(MemoryStore::new())
    } else {
        let sqlite = SqliteStore::connect(&config.database_url).await?;
        // Pick up edits and clicks recorded by other instances
        sqlite
            .spawn_change_poller(config.change_poll_interval)
            .await?;
        Arc::new(sqlite)
    };

    let bind_addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, store));
    let app = contact_link::router(state);

    // ── Serve ──────────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
