use std::sync::Arc;

use delivery_admin::api;
use delivery_admin::config::{Config, LogFormat, StoreConfig, SuggesterConfig};
use delivery_admin::engine::compensation::{run_compensation_worker, RetryPolicy};
use delivery_admin::engine::llm::LlmSuggester;
use delivery_admin::engine::scoring::RuleBasedSuggester;
use delivery_admin::engine::suggest::PartnerSuggester;
use delivery_admin::error::AppError;
use delivery_admin::state::AppState;
use delivery_admin::store::{MemoryStore, RestStore, Store};
use tower_http::services::ServeDir;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    init_tracing(&config);

    let store: Arc<dyn Store> = match &config.store {
        StoreConfig::Memory => Arc::new(MemoryStore::new()),
        StoreConfig::Rest(rest) => Arc::new(RestStore::new(rest)?),
    };
    let suggester: Arc<dyn PartnerSuggester> = match &config.suggester {
        SuggesterConfig::Rules => Arc::new(RuleBasedSuggester::new()),
        SuggesterConfig::Llm(llm) => Arc::new(LlmSuggester::new(llm)?),
    };

    tracing::info!(
        store = store.backend(),
        suggester = suggester.source(),
        "backends configured"
    );

    let (app_state, compensation_rx) = AppState::new(
        store,
        suggester,
        config.compensation_queue_size,
        config.event_buffer_size,
    );
    let shared_state = Arc::new(app_state);

    tokio::spawn(run_compensation_worker(
        shared_state.clone(),
        compensation_rx,
        RetryPolicy {
            max_attempts: config.compensation_max_attempts,
            delay: config.compensation_retry_delay,
        },
    ));

    let mut app = api::rest::router(shared_state.clone());
    if let Some(dir) = &config.static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

fn init_tracing(config: &Config) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Compact => builder.compact().init(),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
