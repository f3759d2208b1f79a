use anyhow::{Context, Result};
use healthsync::config::{load_config_or_default, ProviderMode};
use healthsync::credentials::{CredentialStore, StubIssuer, TokenIssuer};
use healthsync::store::SqliteStore;
use healthsync::{CredentialVault, Ledger};
use std::sync::Arc;
use std::time::Duration;
use sync_manager::api::{create_router, ApiState};
use sync_manager::{
    AdapterRegistry, ConnectionRegistry, SyncOrchestrator, SyncScheduler, SyncSettings,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sync_manager=info,healthsync=info".into()),
        )
        .init();

    info!("HealthSync sync manager starting...");

    let config_path =
        std::env::var("HEALTHSYNC_CONFIG").unwrap_or_else(|_| "healthsync.toml".to_string());
    let config = load_config_or_default(&config_path)?;

    let encryption_key = std::env::var("HEALTHSYNC_ENCRYPTION_KEY")
        .context("HEALTHSYNC_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;

    info!(
        config_path = %config_path,
        records_db = %config.storage.records_db,
        credentials_db = %config.storage.credentials_db,
        mode = ?config.providers.mode,
        api_port = config.api.port,
        "Configuration loaded"
    );

    let adapters = Arc::new(
        AdapterRegistry::from_config(&config.providers)
            .context("Failed to build adapter registry")?,
    );

    let issuer: Arc<dyn TokenIssuer> = match config.providers.mode {
        ProviderMode::Demo => Arc::new(StubIssuer::new()),
        ProviderMode::Live => Arc::new(adapters.oauth_issuer()),
    };

    let credential_store = CredentialStore::new(&config.storage.credentials_db, &encryption_key)
        .context("Failed to initialize credential store")?;
    let vault = Arc::new(CredentialVault::new(credential_store, issuer));
    info!("Credential vault initialized");

    let store = Arc::new(
        SqliteStore::new(&config.storage.records_db)
            .context("Failed to initialize record store")?,
    );
    let ledger = Arc::new(Ledger::new(store));

    let orchestrator = Arc::new(SyncOrchestrator::new(
        Arc::clone(&ledger),
        Arc::clone(&vault),
        Arc::clone(&adapters),
        SyncSettings::from(&config.sync),
    ));
    let connections = Arc::new(
        ConnectionRegistry::new(
            Arc::clone(&ledger),
            Arc::clone(&vault),
            Arc::clone(&adapters),
            Arc::clone(&orchestrator),
        )
        .with_initial_sync(config.sync.initial_sync),
    );

    // Background sync passes
    let scheduler = SyncScheduler::new(
        Arc::clone(&orchestrator),
        Duration::from_secs(config.sync.interval_secs),
    );
    let scheduler_handle = scheduler.start();

    // Start HTTP API server
    let router = create_router(ApiState {
        connections,
        orchestrator,
        adapters,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.api.port))
        .await
        .context("Failed to bind sync API port")?;
    info!(port = config.api.port, "Sync API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Sync API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    scheduler_handle.abort();
    info!("Sync manager stopped");

    Ok(())
}
