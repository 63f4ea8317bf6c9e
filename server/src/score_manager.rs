//! Score Manager (C5).
//!
//! The only writer of `llm_scores` rows and of an article's score columns.
//! Every write is one transaction: either the whole version lands, or
//! nothing does.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::instrument;

use crate::composite::ModelScore;
use crate::db::cache::ScoreCacheInvalidator;
use crate::db::{self, FinalScore, ScoreSource};
use crate::error::{CoreError, CoreResult};

/// Persist one ensemble run's result: a version of per-model scores plus
/// the resulting composite, atomically.
///
/// # Errors
/// Returns [`CoreError::StorageFailed`] if any statement in the transaction
/// fails; in that case no score rows are written and no cache entry is
/// invalidated.
#[instrument(skip(pool, cache, scores, explanations, raw_excerpts))]
pub async fn update_article_score(
    pool: &PgPool,
    cache: &Arc<dyn ScoreCacheInvalidator>,
    article_id: i64,
    scores: &[ModelScore],
    explanations: &[String],
    raw_excerpts: &[String],
    composite: f64,
    confidence: f64,
) -> CoreResult<FinalScore> {
    let mut tx = db::begin(pool).await.map_err(CoreError::StorageFailed)?;

    let version = db::insert_score_version(&mut tx, article_id, scores, explanations, raw_excerpts)
        .await
        .map_err(CoreError::StorageFailed)?;

    db::apply_llm_score(&mut tx, article_id, composite, confidence)
        .await
        .map_err(CoreError::StorageFailed)?;

    tx.commit().await.map_err(CoreError::StorageFailed)?;

    cache.invalidate(article_id);

    Ok(FinalScore {
        article_id,
        version,
        composite_score: composite,
        confidence,
        score_source: ScoreSource::Llm,
    })
}

/// Record that a run failed without writing any score rows: increments
/// `fail_count` only, per spec.md §4.5's fail-closed behavior.
#[instrument(skip(pool))]
pub async fn record_failure(pool: &PgPool, article_id: i64) -> CoreResult<()> {
    db::record_failure(pool, article_id)
        .await
        .map_err(CoreError::StorageFailed)
}

/// Apply a manually-set score, bypassing the ensemble entirely.
///
/// # Errors
/// Returns [`CoreError::Validation`] if `score` is outside `[-1, 1]`.
#[instrument(skip(pool, cache))]
pub async fn apply_manual_score(
    pool: &PgPool,
    cache: &Arc<dyn ScoreCacheInvalidator>,
    article_id: i64,
    score: f64,
) -> CoreResult<()> {
    if !(-1.0..=1.0).contains(&score) {
        return Err(CoreError::Validation(format!(
            "manual score {score} is outside the allowed range [-1, 1]"
        )));
    }

    db::apply_manual_score(pool, article_id, score)
        .await
        .map_err(CoreError::StorageFailed)?;

    cache.invalidate(article_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_score_bounds_are_inclusive() {
        assert!((-1.0_f64..=1.0).contains(&-1.0));
        assert!((-1.0_f64..=1.0).contains(&1.0));
        assert!(!(-1.0_f64..=1.0).contains(&1.0001));
    }
}
