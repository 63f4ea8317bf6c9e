//! NewsBalancer Scoring Core - Main Entry Point
//!
//! Background scoring service: ensemble LLM orchestration, transactional
//! persistence, and a live progress/HTTP surface.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use newsbalancer_scoring::{
    api,
    config::ScoringConfig,
    db,
    db::cache::ArticleScoreCache,
    llm::{HttpLlmClient, LlmClient},
    progress::ProgressTracker,
    score_config, scheduler,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "newsbalancer_scoring=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Arc::new(ScoringConfig::from_env()?);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting NewsBalancer Scoring Core"
    );

    // Model selection is config-file driven, never environment driven (spec
    // invariant): abort startup on a missing or empty score config.
    let score_config = match score_config::load(&config.score_config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!(error = %e, path = %config.score_config_path, "fatal: invalid score config");
            std::process::exit(1);
        }
    };

    // Initialize database
    let db_pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&db_pool).await?;

    let progress = ProgressTracker::new(config.progress_grace_period, config.progress_subscriber_queue_depth);
    progress.clone().spawn_cleanup_task(config.progress_cleanup_interval);

    let llm_client: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(
        config
            .llm_base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
        config.llm_api_key.clone(),
        config.llm_timeout,
        config.executor_max_concurrency,
    ));
    let cache = Arc::new(ArticleScoreCache::new());

    let state = api::AppState::new(
        db_pool.clone(),
        config.clone(),
        Arc::new(score_config),
        progress,
        llm_client,
        cache,
    );

    // Background scheduler keeps scores fresh without manual triggers.
    tokio::spawn(scheduler::run(db_pool, config.clone(), state.executor.clone()));

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Scoring Core listening");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await?;

    info!("Scoring Core shutdown complete");

    Ok(())
}
