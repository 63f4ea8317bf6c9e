//! Ensemble Executor (C3).
//!
//! Runs the full scoring matrix for one article end to end: dispatches a
//! task per `(perspective, model)`, retries and escalates per-task
//! failures, folds the results through the Composite Calculator, and hands
//! the outcome to the Score Manager. The sole writer of `ProgressState` for
//! the article's run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::composite::{self, ModelScore, ParseStatus};
use crate::config::ScoringConfig;
use crate::db::cache::ScoreCacheInvalidator;
use crate::db::{self, Article, FinalScore};
use crate::error::{CoreError, CoreResult};
use crate::llm::{LlmClient, LlmError};
use crate::progress::{ProgressState, ProgressTracker};
use crate::run_registry::{RunHandle, RunOutcome, RunRegistry};
use crate::score_config::{ModelEntry, ScoreConfig};
use crate::score_manager;

/// Everything the Executor needs that outlives a single run.
#[derive(Clone)]
pub struct Executor {
    pub config: Arc<ScoringConfig>,
    pub score_config: Arc<ScoreConfig>,
    pub llm_client: Arc<dyn LlmClient>,
    pub pool: PgPool,
    pub cache: Arc<dyn ScoreCacheInvalidator>,
    pub progress: ProgressTracker,
    pub run_registry: RunRegistry,
}

/// Per-task outcome, still carrying the explanation/excerpt the composite
/// calculator's [`ModelScore`] deliberately drops.
struct TaskResult {
    score: ModelScore,
    explanation: String,
    raw_excerpt: String,
}

impl Executor {
    /// Run the full ensemble for `article`, returning the committed
    /// [`FinalScore`] on success.
    #[instrument(skip(self, article, cancel), fields(article_id = article.id))]
    pub async fn run(
        &self,
        article: &Article,
        cancel: CancellationToken,
    ) -> CoreResult<FinalScore> {
        self.progress.set(ProgressState::starting(article.id));

        // Once an article has failed often enough, start this run above
        // tier 0 (spec.md §4.6) instead of waiting for per-task retries to
        // exhaust before escalating.
        let start_tier: u32 = u32::from(article.fail_count >= self.config.scheduler_escalation_threshold);
        let dispatch_models = self.score_config.models_at_or_above(start_tier);
        if dispatch_models.is_empty() {
            self.progress
                .set(ProgressState::error(article.id, "no_models_configured"));
            return Err(CoreError::NoModelsConfigured);
        }

        let run_body = self.run_tasks(article, &dispatch_models, cancel.clone());
        let scores = match tokio::time::timeout(self.config.executor_run_deadline, run_body).await
        {
            Ok(scores) => scores,
            Err(_) => {
                // `run_tasks`'s own future is dropped by the timeout, but the
                // per-task work it spawned keeps running as detached tokio
                // tasks. Cancelling the shared token is what actually stops
                // them: every task and retry/backoff loop checks it, and an
                // in-flight `score()` call races it via `select!`.
                cancel.cancel();
                score_manager::record_failure(&self.pool, article.id).await?;
                self.progress
                    .set(ProgressState::error(article.id, "deadline_exceeded"));
                return Err(CoreError::DeadlineExceeded);
            }
        };

        if cancel.is_cancelled() {
            score_manager::record_failure(&self.pool, article.id).await?;
            self.progress.set(ProgressState::error(article.id, "cancelled"));
            return Err(CoreError::Cancelled);
        }

        let model_scores: Vec<ModelScore> = scores.iter().map(|t| t.score.clone()).collect();
        let explanations: Vec<String> = scores.iter().map(|t| t.explanation.clone()).collect();
        let raw_excerpts: Vec<String> = scores.iter().map(|t| t.raw_excerpt.clone()).collect();

        let composite = match composite::compute(&model_scores, &self.score_config) {
            Ok(c) => c,
            Err(_) => {
                score_manager::record_failure(&self.pool, article.id).await?;
                self.progress
                    .set(ProgressState::error(article.id, "incomplete_score"));
                return Err(CoreError::IncompleteScore);
            }
        };

        let final_score = match score_manager::update_article_score(
            &self.pool,
            &self.cache,
            article.id,
            &model_scores,
            &explanations,
            &raw_excerpts,
            composite.composite,
            composite.confidence,
        )
        .await
        {
            Ok(f) => f,
            Err(e) => {
                self.progress
                    .set(ProgressState::error(article.id, "storage_failed"));
                return Err(e);
            }
        };

        self.progress
            .set(ProgressState::in_progress(article.id, "Storing results", 95));
        self.progress
            .set(ProgressState::success(article.id, final_score.composite_score));

        Ok(final_score)
    }

    /// Entry point every caller (the HTTP reanalyze path and the background
    /// scheduler alike) must use instead of [`Executor::run`] directly.
    ///
    /// Enforces the single-run-per-article invariant (§4.3/§5): a second
    /// concurrent call for the same `article.id` joins the in-flight run
    /// rather than starting a second one, whether that in-flight run was
    /// itself started by a user request or a scheduler tick.
    #[instrument(skip(self, article, cancel), fields(article_id = article.id))]
    pub async fn run_coordinated(&self, article: &Article, cancel: CancellationToken) -> RunOutcome {
        match self.run_registry.start_or_join(article.id) {
            RunHandle::Leader { article_id, registry, tx } => {
                let outcome = match self.run(article, cancel).await {
                    Ok(_) => RunOutcome::Success,
                    Err(e) => RunOutcome::Failed(e.kind().to_string()),
                };
                RunHandle::Leader { article_id, registry, tx }.finish(outcome.clone());
                outcome
            }
            joined @ RunHandle::Joined { .. } => joined.outcome().await,
        }
    }

    /// Run every dispatch-tier task with bounded concurrency, reporting
    /// progress as each one completes. Every task always resolves to a
    /// [`TaskResult`] (possibly a failed one) — the filtering and
    /// escalation-aware aggregation happens in [`composite::compute`].
    async fn run_tasks(
        &self,
        article: &Article,
        dispatch_models: &[&ModelEntry],
        cancel: CancellationToken,
    ) -> Vec<TaskResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.executor_max_concurrency));
        let completed = Arc::new(AtomicUsize::new(0));
        let total = dispatch_models.len();

        let mut handles = Vec::with_capacity(total);
        for entry in dispatch_models {
            let entry = (*entry).clone();
            let this = self.clone();
            let article = article.clone();
            let semaphore = semaphore.clone();
            let completed = completed.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore not closed");
                let result = this.run_task_with_retries(&article, &entry, &cancel).await;

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                let percent = ((done as f64 / total as f64) * 80.0).floor() as u8;
                this.progress.set(ProgressState::in_progress(
                    article.id,
                    format!("Scoring {}/{}", entry.perspective, entry.model_name),
                    percent,
                ));

                result
            }));
        }

        let mut results = Vec::with_capacity(total);
        for handle in handles {
            match handle.await {
                Ok(task_result) => results.push(task_result),
                Err(e) => warn!(error = %e, "ensemble task panicked"),
            }
        }
        results
    }

    /// Drive one `(perspective, model)` task through the parse-retry /
    /// backoff-retry / escalation ladder from spec.md §4.3.
    async fn run_task_with_retries(
        &self,
        article: &Article,
        entry: &ModelEntry,
        cancel: &CancellationToken,
    ) -> TaskResult {
        let mut parse_retries_left = self.config.executor_parse_retries;
        let mut backoff_retries_left = self.config.executor_backoff_retries;
        let mut prompt_variant = entry.prompt_variant.clone();
        let mut attempt = 0i32;

        loop {
            if cancel.is_cancelled() {
                return failed_task(entry, "cancelled");
            }

            attempt += 1;
            let start = std::time::Instant::now();
            let outcome = tokio::select! {
                () = cancel.cancelled() => return failed_task(entry, "cancelled"),
                outcome = self.llm_client.score(
                    article,
                    &entry.model_name,
                    &prompt_variant,
                    self.score_config.min_score,
                    self.score_config.max_score,
                ) => outcome,
            };
            let latency_ms = start.elapsed().as_millis() as i32;

            self.log_attempt(article.id, entry, attempt, &prompt_variant, latency_ms, &outcome)
                .await;

            match outcome {
                Ok(result) => {
                    return TaskResult {
                        score: ModelScore {
                            perspective: entry.perspective,
                            model_name: entry.model_name.clone(),
                            raw_score: result.raw_score,
                            confidence: result.confidence,
                            parse_status: ParseStatus::Ok,
                        },
                        explanation: result.explanation,
                        raw_excerpt: result.raw_response_excerpt,
                    };
                }
                Err(e) if matches!(e, LlmError::ParseError { .. } | LlmError::SchemaError { .. }) => {
                    if parse_retries_left > 0 {
                        parse_retries_left -= 1;
                        prompt_variant = "strict".to_string();
                        continue;
                    }
                }
                Err(ref e) if e.is_transient() => {
                    if backoff_retries_left > 0 {
                        let delay = self.backoff_delay(
                            self.config.executor_backoff_retries - backoff_retries_left,
                        );
                        backoff_retries_left -= 1;
                        tokio::select! {
                            () = cancel.cancelled() => return failed_task(entry, "cancelled"),
                            () = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                }
                Err(_) => {
                    // Permanent (auth / other 4xx): no retry.
                }
            }

            break;
        }

        if let Some(escalated) = self.try_escalate(article, entry, cancel).await {
            return escalated;
        }

        failed_task(entry, "exhausted retries")
    }

    /// One non-retried attempt against the next-higher escalation tier for
    /// the same perspective, if one is configured.
    async fn try_escalate(
        &self,
        article: &Article,
        entry: &ModelEntry,
        cancel: &CancellationToken,
    ) -> Option<TaskResult> {
        let escalation = self
            .score_config
            .models_for(entry.perspective)
            .into_iter()
            .filter(|m| m.escalation_tier > entry.escalation_tier)
            .min_by_key(|m| m.escalation_tier)?;

        if cancel.is_cancelled() {
            return None;
        }

        let start = std::time::Instant::now();
        let outcome = tokio::select! {
            () = cancel.cancelled() => return None,
            outcome = self.llm_client.score(
                article,
                &escalation.model_name,
                &escalation.prompt_variant,
                self.score_config.min_score,
                self.score_config.max_score,
            ) => outcome,
        };
        let latency_ms = start.elapsed().as_millis() as i32;

        self.log_attempt(article.id, escalation, 1, &escalation.prompt_variant, latency_ms, &outcome)
            .await;

        match outcome {
            Ok(result) => Some(TaskResult {
                score: ModelScore {
                    perspective: escalation.perspective,
                    model_name: escalation.model_name.clone(),
                    raw_score: result.raw_score,
                    confidence: result.confidence,
                    parse_status: ParseStatus::Ok,
                },
                explanation: result.explanation,
                raw_excerpt: result.raw_response_excerpt,
            }),
            Err(_) => None,
        }
    }

    fn backoff_delay(&self, attempt_index: u32) -> Duration {
        let base = self.config.executor_backoff_base;
        let cap = self.config.executor_backoff_cap;
        let exp = base.saturating_mul(1u32 << attempt_index.min(16));
        let capped = exp.min(cap);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4 + 1);
        capped + Duration::from_millis(jitter_ms)
    }

    async fn log_attempt(
        &self,
        article_id: i64,
        entry: &ModelEntry,
        attempt: i32,
        prompt_variant: &str,
        latency_ms: i32,
        outcome: &Result<crate::llm::LlmScoreResult, LlmError>,
    ) {
        let (http_status, parse_outcome, error_class) = match outcome {
            Ok(_) => (None, "ok".to_string(), None),
            Err(e) => (status_of(e), e.kind().to_string(), Some(e.kind())),
        };

        if let Err(e) = db::log_attempt(
            &self.pool,
            article_id,
            &entry.model_name,
            attempt,
            prompt_variant,
            http_status,
            latency_ms,
            &parse_outcome,
            error_class,
        )
        .await
        {
            warn!(error = %e, "failed to persist attempt log");
        }
    }
}

fn status_of(err: &LlmError) -> Option<i32> {
    match err {
        LlmError::HttpStatus { status, .. } => Some(i32::from(*status)),
        _ => None,
    }
}

fn failed_task(entry: &ModelEntry, reason: &str) -> TaskResult {
    TaskResult {
        score: ModelScore {
            perspective: entry.perspective,
            model_name: entry.model_name.clone(),
            raw_score: 0.0,
            confidence: 0.0,
            parse_status: ParseStatus::ParseError,
        },
        explanation: reason.to_string(),
        raw_excerpt: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::cache::NoopCache;
    use crate::score_config::{Formula, HandleInvalid};

    fn dummy_score_config() -> ScoreConfig {
        ScoreConfig {
            models: vec![],
            formula: Formula::Average,
            min_score: -1.0,
            max_score: 1.0,
            handle_invalid: HandleInvalid::Ignore,
            min_confidence_floor: 0.0,
            concurrency: None,
        }
    }

    /// Never dialed; `connect_lazy` defers all I/O until first use, which
    /// this test never triggers.
    fn unreachable_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool construction never touches the network")
    }

    fn no_llm_client() -> Arc<dyn LlmClient> {
        struct Unreachable;
        #[async_trait::async_trait]
        impl LlmClient for Unreachable {
            async fn score(
                &self,
                _article: &Article,
                model_name: &str,
                _prompt_variant: &str,
                _min_score: f64,
                _max_score: f64,
            ) -> Result<crate::llm::LlmScoreResult, LlmError> {
                Err(LlmError::Auth {
                    model: model_name.to_string(),
                })
            }
        }
        Arc::new(Unreachable)
    }

    #[test]
    fn backoff_delay_respects_cap() {
        let config = Arc::new(ScoringConfig::default_for_test());
        let executor = Executor {
            config: config.clone(),
            score_config: Arc::new(dummy_score_config()),
            llm_client: no_llm_client(),
            pool: unreachable_pool(),
            cache: Arc::new(NoopCache),
            progress: ProgressTracker::new(Duration::from_secs(1), 4),
            run_registry: RunRegistry::new(),
        };

        let slack = Duration::from_millis(config.executor_backoff_cap.as_millis() as u64 / 4 + 1);
        for attempt in 0..20 {
            let delay = executor.backoff_delay(attempt);
            assert!(delay <= config.executor_backoff_cap + slack);
        }
    }
}
