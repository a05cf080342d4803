mod accounting;
mod broadcast;
mod config;
mod error;
mod events;
mod handlers;
mod llm;
mod metrics;
mod orchestrator;
mod progress;
mod retry;
mod scoring;
mod store;
mod ws;

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::store::{MemoryStore, ResultStore, SqliteStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("llm_eval=info".parse()?),
        )
        .init();

    let config = Arc::new(config::Config::from_env());
    let models = Arc::new(config::ModelsConfig::load(&config.models_config)?);
    config.print_banner(&models);

    let store: Arc<dyn ResultStore> = if config.database_path == ":memory:" {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(SqliteStore::open(&config.database_path)?)
    };
    seed_default_suite(store.as_ref(), &config).await?;

    let registry = Arc::new(llm::ProviderRegistry::from_config(&models)?);
    let accountant = Arc::new(accounting::TokenAccountant::new(registry.clone())?);
    let backend = Arc::new(llm::HttpBackend::from_config(
        &config,
        models.settings.max_tokens,
    )?);
    let broadcaster =
        broadcast::ProgressBroadcaster::new(Duration::from_secs(config.heartbeat_secs));
    let metrics_store = metrics::Metrics::new();

    let orchestrator = orchestrator::Orchestrator::new(
        backend,
        store,
        broadcaster.clone(),
        registry.clone(),
        accountant,
        &models,
        metrics_store.clone(),
    )
    .with_pacing(Duration::from_millis(config.pacing_ms));

    info!(models = registry.len(), "Provider registry loaded");

    let state = Arc::new(handlers::AppState {
        config: config.clone(),
        models,
        orchestrator: Arc::new(orchestrator),
        broadcaster,
        metrics: metrics_store,
        semaphore: Arc::new(Semaphore::new(config.max_concurrent_runs)),
        started_at: chrono::Utc::now(),
    });

    let app = handlers::router(state);
    let addr = format!("0.0.0.0:{}", config.port);

    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, draining...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Shutdown complete");
    Ok(())
}

/// Creates the default suite from the test case file on first start.
async fn seed_default_suite(store: &dyn ResultStore, config: &config::Config) -> Result<()> {
    let existing = store.load_suite(&config.evaluation_type).await?;
    if existing.is_some_and(|cases| !cases.is_empty()) {
        return Ok(());
    }
    if !config.test_cases_path.exists() {
        warn!(
            path = %config.test_cases_path.display(),
            evaluation_type = %config.evaluation_type,
            "No test case file, starting without a suite"
        );
        return Ok(());
    }
    let cases = store::load_suite_file(&config.test_cases_path)?;
    let description = store::snake_to_title_case(&config.evaluation_type);
    let inserted = store
        .seed_suite(&config.evaluation_type, Some(&description), cases)
        .await?;
    info!(
        evaluation_type = %config.evaluation_type,
        test_cases = inserted,
        "Seeded evaluation suite"
    );
    Ok(())
}
