//! API Router and Application State
//!
//! The HTTP surface named in spec.md §6: reanalyze, live progress, and
//! manual scoring. Everything else (ingestion, article reads, auth) is an
//! external collaborator out of scope for this crate.

mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ScoringConfig;
use crate::db::cache::ScoreCacheInvalidator;
use crate::ensemble::Executor;
use crate::llm::LlmClient;
use crate::progress::ProgressTracker;
use crate::run_registry::RunRegistry;
use crate::score_config::ScoreConfig;

/// Shared application state for every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<ScoringConfig>,
    pub score_config: Arc<ScoreConfig>,
    pub progress: ProgressTracker,
    pub run_registry: RunRegistry,
    pub cache: Arc<dyn ScoreCacheInvalidator>,
    pub executor: Executor,
}

impl AppState {
    #[must_use]
    pub fn new(
        db: PgPool,
        config: Arc<ScoringConfig>,
        score_config: Arc<ScoreConfig>,
        progress: ProgressTracker,
        llm_client: Arc<dyn LlmClient>,
        cache: Arc<dyn ScoreCacheInvalidator>,
    ) -> Self {
        let run_registry = RunRegistry::new();
        let executor = Executor {
            config: config.clone(),
            score_config: score_config.clone(),
            llm_client,
            pool: db.clone(),
            cache: cache.clone(),
            progress: progress.clone(),
            run_registry: run_registry.clone(),
        };

        Self {
            db,
            config,
            score_config,
            progress,
            run_registry,
            cache,
            executor,
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::reanalyze,
        handlers::score_progress,
        handlers::manual_score,
    ),
    tags((name = "scoring", description = "NewsBalancer Scoring Core"))
)]
pub struct ApiDoc;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/reanalyze/{article_id}", post(handlers::reanalyze))
        .route("/score-progress/{article_id}", get(handlers::score_progress))
        .route("/manual-score/{article_id}", post(handlers::manual_score))
        .merge(SwaggerUi::new("/api/docs").url("/api/docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize, utoipa::ToSchema)]
struct HealthResponse {
    status: &'static str,
    database: bool,
}

async fn health_check(axum::extract::State(state): axum::extract::State<AppState>) -> Json<HealthResponse> {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.db).await.is_ok();
    Json(HealthResponse {
        status: if db_ok { "ok" } else { "degraded" },
        database: db_ok,
    })
}
