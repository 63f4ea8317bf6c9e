//! Reusable test helpers for scoring integration tests.
//!
//! Mirrors the teacher's own `TestApp` pattern: a real Postgres connection
//! plus the full axum router, with the LLM client swapped for a scripted
//! mock so runs are deterministic and hit no network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{self, Method, Request, Response},
    Router,
};
use chrono::Utc;
use newsbalancer_scoring::{
    api::{create_router, AppState},
    config::ScoringConfig,
    db,
    db::cache::ArticleScoreCache,
    db::Article,
    llm::{LlmClient, LlmError, LlmScoreResult},
    progress::ProgressTracker,
    score_config::{Formula, HandleInvalid, ModelEntry, Perspective, ScoreConfig},
};
use sqlx::PgPool;
use tower::ServiceExt;

/// Spin up `docker run -d --name newsbalancer-test-postgres -e POSTGRES_USER=test \
/// -e POSTGRES_PASSWORD=test -e POSTGRES_DB=test -p 5434:5432 postgres:16` and run
/// migrations before these tests, per `ScoringConfig::default_for_test`'s doc comment.
pub struct TestApp {
    pub router: Router,
    pub pool: PgPool,
    pub llm: Arc<ScriptedLlmClient>,
}

impl TestApp {
    pub async fn new() -> Self {
        let config = Arc::new(ScoringConfig::default_for_test());
        let pool = db::create_pool(&config.database_url)
            .await
            .expect("failed to connect to test DB");
        db::run_migrations(&pool).await.expect("failed to run migrations");

        let score_config = Arc::new(three_perspective_config());
        let progress = ProgressTracker::new(config.progress_grace_period, config.progress_subscriber_queue_depth);
        let llm: Arc<ScriptedLlmClient> = Arc::new(ScriptedLlmClient::new());
        let cache = Arc::new(ArticleScoreCache::new());

        let state = AppState::new(
            pool.clone(),
            config,
            score_config,
            progress,
            llm.clone() as Arc<dyn LlmClient>,
            cache,
        );
        let router = create_router(state);

        Self { router, pool, llm }
    }

    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.expect("oneshot request failed")
    }
}

/// Three tier-0 models (one per perspective) plus one tier-1 escalation
/// entry for `left`, matching the shape spec.md's seed scenarios assume.
pub fn three_perspective_config() -> ScoreConfig {
    ScoreConfig {
        models: vec![
            ModelEntry {
                perspective: Perspective::Left,
                model_name: "left-model".into(),
                prompt_variant: "default".into(),
                weight: 1.0,
                escalation_tier: 0,
            },
            ModelEntry {
                perspective: Perspective::Left,
                model_name: "left-model-escalated".into(),
                prompt_variant: "default".into(),
                weight: 1.0,
                escalation_tier: 1,
            },
            ModelEntry {
                perspective: Perspective::Center,
                model_name: "center-model".into(),
                prompt_variant: "default".into(),
                weight: 1.0,
                escalation_tier: 0,
            },
            ModelEntry {
                perspective: Perspective::Right,
                model_name: "right-model".into(),
                prompt_variant: "default".into(),
                weight: 1.0,
                escalation_tier: 0,
            },
        ],
        formula: Formula::Average,
        min_score: -1.0,
        max_score: 1.0,
        handle_invalid: HandleInvalid::Ignore,
        min_confidence_floor: 0.0,
        concurrency: None,
    }
}

/// Insert a fresh unscored test article, returning its id.
pub async fn insert_test_article(pool: &PgPool) -> i64 {
    let row: (i64,) = sqlx::query_as(
        r"
        INSERT INTO articles (source, url, title, content, pub_date, fetched_at, score_source, fail_count)
        VALUES ($1, $2, $3, $4, $5, $5, 'none', 0)
        RETURNING id
        ",
    )
    .bind("test-source")
    .bind(format!("https://example.test/{}", uuid::Uuid::new_v4()))
    .bind("Test Article")
    .bind("Body text for the test article.")
    .bind(Utc::now())
    .fetch_one(pool)
    .await
    .expect("failed to insert test article");
    row.0
}

pub async fn fetch_article(pool: &PgPool, article_id: i64) -> Article {
    db::find_article(pool, article_id)
        .await
        .expect("query failed")
        .expect("article not found")
}

pub async fn delete_article(pool: &PgPool, article_id: i64) {
    sqlx::query("DELETE FROM articles WHERE id = $1")
        .bind(article_id)
        .execute(pool)
        .await
        .expect("failed to delete test article");
}

/// Canned outcome for one `(model_name)` call.
#[derive(Clone)]
pub enum Script {
    Ok { score: f64, confidence: f64 },
    Err(fn(String) -> LlmError),
}

/// A deterministic [`LlmClient`] double: each model name has a queue of
/// scripted outcomes, consumed in order, with the last outcome repeating
/// once the queue is drained.
pub struct ScriptedLlmClient {
    scripts: Mutex<HashMap<String, Vec<Script>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script(&self, model_name: &str, outcomes: Vec<Script>) {
        self.scripts.lock().unwrap().insert(model_name.to_string(), outcomes);
    }

    pub fn call_count(&self, model_name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| *m == model_name).count()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn score(
        &self,
        _article: &Article,
        model_name: &str,
        _prompt_variant: &str,
        min_score: f64,
        max_score: f64,
    ) -> Result<LlmScoreResult, LlmError> {
        self.calls.lock().unwrap().push(model_name.to_string());

        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts
            .get_mut(model_name)
            .unwrap_or_else(|| panic!("no script registered for model {model_name}"));

        let outcome = if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue[0].clone()
        };

        match outcome {
            Script::Ok { score, confidence } => Ok(LlmScoreResult {
                raw_score: score.clamp(min_score, max_score),
                confidence,
                explanation: "scripted".to_string(),
                raw_response_excerpt: "{}".to_string(),
            }),
            Script::Err(build) => Err(build(model_name.to_string())),
        }
    }
}
