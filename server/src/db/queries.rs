//! Database Queries
//!
//! Runtime queries (no compile-time `DATABASE_URL` dependency), matching
//! the workspace's `sqlx::query_as` convention.

use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};

use super::models::Article;
use crate::composite::ModelScore;

// === Article Reads ===

/// Fetch a single article by ID.
pub async fn find_article(pool: &PgPool, article_id: i64) -> sqlx::Result<Option<Article>> {
    sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = $1")
        .bind(article_id)
        .fetch_optional(pool)
        .await
}

/// Candidate articles for the Scheduler: unscored, or `llm`-sourced and
/// stale past `refresh_interval`. Ordered low-`fail_count`-first then
/// oldest-fetched-first so a few consistently-failing articles don't starve
/// healthy ones.
pub async fn select_scoring_candidates(
    pool: &PgPool,
    refresh_interval: chrono::Duration,
    skip_fail_count: i32,
    limit: i64,
) -> sqlx::Result<Vec<Article>> {
    let cutoff = Utc::now() - refresh_interval;
    sqlx::query_as::<_, Article>(
        r"
        SELECT * FROM articles
        WHERE fail_count < $1
          AND (
            composite_score IS NULL
            OR (score_source = 'llm' AND (last_scored_at IS NULL OR last_scored_at < $2))
          )
        ORDER BY fail_count ASC, fetched_at ASC
        LIMIT $3
        ",
    )
    .bind(skip_fail_count)
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await
}

// === Score Manager: Transactional Write Path ===

/// Begin a transaction for the Score Manager's atomic write path.
pub async fn begin(pool: &PgPool) -> sqlx::Result<Transaction<'_, Postgres>> {
    pool.begin().await
}

/// Next monotonic version for an article's score history.
async fn next_version(tx: &mut Transaction<'_, Postgres>, article_id: i64) -> sqlx::Result<i32> {
    let row: (Option<i32>,) =
        sqlx::query_as("SELECT MAX(version) FROM llm_scores WHERE article_id = $1")
            .bind(article_id)
            .fetch_one(&mut **tx)
            .await?;
    Ok(row.0.unwrap_or(0) + 1)
}

/// Allocate the next version and insert one `llm_scores` row per per-model
/// result (including non-`ok` parses, for auditability), all within `tx`.
/// Returns the version used.
pub async fn insert_score_version(
    tx: &mut Transaction<'_, Postgres>,
    article_id: i64,
    scores: &[ModelScore],
    explanations: &[String],
    raw_excerpts: &[String],
) -> sqlx::Result<i32> {
    let version = next_version(tx, article_id).await?;

    for ((score, explanation), excerpt) in scores.iter().zip(explanations).zip(raw_excerpts) {
        sqlx::query(
            r"
            INSERT INTO llm_scores
                (article_id, version, perspective, model_name, raw_score, confidence,
                 explanation, parse_status, raw_response_excerpt, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            ",
        )
        .bind(article_id)
        .bind(version)
        .bind(score.perspective)
        .bind(&score.model_name)
        .bind(score.raw_score)
        .bind(score.confidence)
        .bind(explanation)
        .bind(score.parse_status)
        .bind(excerpt)
        .execute(&mut **tx)
        .await?;
    }

    Ok(version)
}

/// Update the article's score columns after a successful ensemble run.
/// Resets `fail_count` to 0.
pub async fn apply_llm_score(
    tx: &mut Transaction<'_, Postgres>,
    article_id: i64,
    composite_score: f64,
    confidence: f64,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        UPDATE articles
        SET composite_score = $1,
            confidence = $2,
            score_source = 'llm',
            fail_count = 0,
            last_scored_at = now()
        WHERE id = $3
        ",
    )
    .bind(composite_score)
    .bind(confidence)
    .bind(article_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// === Failure Bookkeeping ===

/// Record a failed run: increments `fail_count`, leaves the existing
/// composite score untouched (fail-closed, per spec.md §3/§7).
pub async fn record_failure(pool: &PgPool, article_id: i64) -> sqlx::Result<()> {
    sqlx::query("UPDATE articles SET fail_count = fail_count + 1 WHERE id = $1")
        .bind(article_id)
        .execute(pool)
        .await?;
    Ok(())
}

// === Manual Scoring ===

/// Apply a manual score directly, bypassing the ensemble entirely.
pub async fn apply_manual_score(pool: &PgPool, article_id: i64, score: f64) -> sqlx::Result<()> {
    sqlx::query(
        r"
        UPDATE articles
        SET composite_score = $1,
            confidence = 1.0,
            score_source = 'manual'
        WHERE id = $2
        ",
    )
    .bind(score)
    .bind(article_id)
    .execute(pool)
    .await?;
    Ok(())
}

// === Attempt Log ===

/// Append a diagnostic attempt record. Failures here are never fatal to the
/// scoring path itself (diagnostics, not correctness).
#[allow(clippy::too_many_arguments)]
pub async fn log_attempt(
    pool: &PgPool,
    article_id: i64,
    model_name: &str,
    attempt: i32,
    prompt_variant: &str,
    http_status: Option<i32>,
    latency_ms: i32,
    parse_outcome: &str,
    error_class: Option<&str>,
) -> sqlx::Result<()> {
    sqlx::query(
        r"
        INSERT INTO attempt_logs
            (article_id, model_name, attempt, prompt_variant, http_status,
             latency_ms, parse_outcome, error_class, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
        ",
    )
    .bind(article_id)
    .bind(model_name)
    .bind(attempt)
    .bind(prompt_variant)
    .bind(http_status)
    .bind(latency_ms)
    .bind(parse_outcome)
    .bind(error_class)
    .execute(pool)
    .await?;
    Ok(())
}

// === Diagnostic / Read-back Helpers ===

/// Fetch the `llm_scores` rows for a given article + version.
pub async fn find_score_rows(
    pool: &PgPool,
    article_id: i64,
    version: i32,
) -> sqlx::Result<Vec<super::models::LlmScoreRow>> {
    sqlx::query_as::<_, super::models::LlmScoreRow>(
        "SELECT * FROM llm_scores WHERE article_id = $1 AND version = $2",
    )
    .bind(article_id)
    .bind(version)
    .fetch_all(pool)
    .await
}
