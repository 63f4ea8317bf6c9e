//! Read-side cache invalidation hook.
//!
//! The article list/detail read APIs are external collaborators (out of
//! scope per spec.md §1) that are expected to cache `composite_score` /
//! `confidence` lookups. The Score Manager must invalidate those entries
//! on every successful commit, and only on a successful commit.

use moka::sync::Cache;
use std::time::Duration;

/// Named interface the Score Manager invalidates through after a commit.
pub trait ScoreCacheInvalidator: Send + Sync {
    fn invalidate(&self, article_id: i64);
}

/// In-process cache standing in for the read-side cache external to the
/// Core. Real deployments would point this at whatever the article
/// list/detail API uses (e.g. a shared Redis or moka instance); this
/// default keeps the Core's commit path fully testable without one.
pub struct ArticleScoreCache {
    inner: Cache<i64, ()>,
}

impl ArticleScoreCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(50_000)
                .time_to_live(Duration::from_secs(3600))
                .build(),
        }
    }
}

impl Default for ArticleScoreCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreCacheInvalidator for ArticleScoreCache {
    fn invalidate(&self, article_id: i64) {
        self.inner.invalidate(&article_id);
    }
}

/// No-op invalidator, used by the Scheduler's discard-sink runs and tests
/// that do not care about cache coherence.
pub struct NoopCache;

impl ScoreCacheInvalidator for NoopCache {
    fn invalidate(&self, _article_id: i64) {}
}
