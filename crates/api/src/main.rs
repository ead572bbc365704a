use std::sync::Arc;

use anyhow::Context;

use lotwise_ai::CompletionClient;
use lotwise_api::app::{AppState, BatchLimits, SharedProcessor, build_app};
use lotwise_core::SystemClock;
use lotwise_infra::config::AppConfig;
use lotwise_infra::db;
use lotwise_infra::external::OpenAiCompatibleClient;
use lotwise_infra::jobs::{InMemoryJobStore, JobProcessor, JobStore, PostgresJobStore};
use lotwise_infra::usage::{InMemoryUsageLedger, PostgresUsageLedger, UsageLedger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lotwise_observability::init();

    let config = AppConfig::from_env().context("failed to load configuration")?;

    let client: Arc<dyn CompletionClient> = Arc::new(
        OpenAiCompatibleClient::new(config.provider.clone())
            .context("failed to build provider client")?,
    );

    let (store, ledger): (Arc<dyn JobStore>, Arc<dyn UsageLedger>) = match &config.database_url {
        Some(url) => {
            let pool = db::connect(url, config.database_max_connections)
                .await
                .context("failed to connect to database")?;
            db::ensure_schema(&pool)
                .await
                .context("failed to ensure database schema")?;
            (
                Arc::new(PostgresJobStore::new(pool.clone())),
                Arc::new(PostgresUsageLedger::new(pool)),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory job store and usage ledger");
            (InMemoryJobStore::arc(), InMemoryUsageLedger::arc())
        }
    };

    let processor: SharedProcessor =
        JobProcessor::new(store, client, ledger, Arc::new(SystemClock));

    let state = AppState {
        processor: Arc::new(processor),
        batch_limits: BatchLimits {
            default_size: config.default_batch_size,
            max_size: config.max_batch_size,
        },
    };
    let app = build_app(state, config.worker_token.as_str());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
