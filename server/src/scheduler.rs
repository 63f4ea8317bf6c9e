//! Scoring Scheduler (C6).
//!
//! Keeps article scores fresh without manual triggers: every tick it picks
//! a batch of stale or unscored articles and dispatches them to a bounded
//! worker pool running the Ensemble Executor with a discard progress sink.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ScoringConfig;
use crate::db;
use crate::ensemble::Executor;
use crate::run_registry::RunOutcome;

/// Run the scheduler loop forever, ticking every `config.scheduler_tick_period`.
pub async fn run(pool: PgPool, config: Arc<ScoringConfig>, executor: Executor) {
    let mut ticker = tokio::time::interval(config.scheduler_tick_period);
    loop {
        ticker.tick().await;
        tick(&pool, &config, &executor).await;
    }
}

async fn tick(pool: &PgPool, config: &ScoringConfig, executor: &Executor) {
    let refresh_interval = chrono::Duration::from_std(config.scheduler_refresh_interval)
        .unwrap_or_else(|_| chrono::Duration::hours(24));

    let candidates = match db::select_scoring_candidates(
        pool,
        refresh_interval,
        config.scheduler_skip_threshold,
        config.scheduler_batch_size,
    )
    .await
    {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::error!(error = %e, "scheduler tick: failed to select candidates");
            return;
        }
    };

    let total_candidates = candidates.len();
    let semaphore = Arc::new(Semaphore::new(config.scheduler_workers));
    let mut handles = Vec::with_capacity(total_candidates);

    for article in candidates {
        let semaphore = semaphore.clone();
        let executor = executor.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            let cancel = CancellationToken::new();
            // `run_coordinated` joins an in-flight run rather than racing it,
            // so a tick landing on an article a concurrent `/reanalyze` call
            // is already driving shares that run instead of starting a second.
            executor.run_coordinated(&article, cancel).await
        }));
    }

    let mut started = 0usize;
    let mut succeeded = 0usize;
    let mut failed = 0usize;

    for handle in handles {
        started += 1;
        match handle.await {
            Ok(RunOutcome::Success) => succeeded += 1,
            Ok(RunOutcome::Failed(_)) | Err(_) => failed += 1,
        }
    }

    info!(
        candidates = total_candidates,
        started, succeeded, failed, "scheduler tick complete"
    );
}

