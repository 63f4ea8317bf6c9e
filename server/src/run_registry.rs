//! Per-article singleton run registry.
//!
//! Spec.md's resolution to its own open question: concurrent reanalyze
//! requests for the same article join the in-flight run rather than
//! queuing a second one. A keyed entry holds a [`tokio::sync::Notify`]-like
//! completion signal shared by every joiner.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

/// Outcome shared with every caller that joined an in-flight run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Success,
    Failed(String),
}

enum Slot {
    Running(watch::Receiver<Option<RunOutcome>>),
}

/// Coalesces concurrent `reanalyze` calls for the same article into one
/// underlying Ensemble Executor run.
#[derive(Clone, Default)]
pub struct RunRegistry {
    inflight: Arc<DashMap<i64, Slot>>,
}

/// What the caller should do: either it won the race and must drive the
/// run (and call [`RunHandle::finish`] when done), or it joined an
/// existing run and should just await the outcome.
pub enum RunHandle {
    Leader {
        article_id: i64,
        registry: RunRegistry,
        tx: watch::Sender<Option<RunOutcome>>,
    },
    Joined {
        rx: watch::Receiver<Option<RunOutcome>>,
    },
}

impl RunRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Either become the leader for `article_id`'s run, or join the
    /// existing one. Uses `DashMap::entry` so the check-and-insert is a
    /// single atomic operation under the shard lock — two concurrent
    /// callers can never both observe a vacant slot and both become
    /// leader, the way `ProviderLimiter::semaphore_for` guarantees for its
    /// own per-model map.
    pub fn start_or_join(&self, article_id: i64) -> RunHandle {
        match self.inflight.entry(article_id) {
            Entry::Occupied(entry) => {
                let Slot::Running(rx) = entry.get();
                RunHandle::Joined { rx: rx.clone() }
            }
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(Slot::Running(rx));
                RunHandle::Leader {
                    article_id,
                    registry: self.clone(),
                    tx,
                }
            }
        }
    }
}

impl RunHandle {
    /// Wait for the run (whether led by this caller or another) to finish.
    pub async fn outcome(self) -> RunOutcome {
        match self {
            RunHandle::Leader { .. } => {
                unreachable!("leader must call finish() instead of outcome()")
            }
            RunHandle::Joined { mut rx } => loop {
                if let Some(outcome) = rx.borrow().clone() {
                    return outcome;
                }
                if rx.changed().await.is_err() {
                    return RunOutcome::Failed("run registry closed".to_string());
                }
            },
        }
    }

    /// Leader-only: publish the outcome to all joiners and release the slot.
    pub fn finish(self, outcome: RunOutcome) {
        if let RunHandle::Leader {
            article_id,
            registry,
            tx,
        } = self
        {
            let _ = tx.send(Some(outcome));
            registry.inflight.remove(&article_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_caller_joins_instead_of_starting_a_new_run() {
        let registry = RunRegistry::new();

        let first = registry.start_or_join(1);
        assert!(matches!(first, RunHandle::Leader { .. }));

        let second = registry.start_or_join(1);
        assert!(matches!(second, RunHandle::Joined { .. }));

        let joined_outcome = tokio::spawn(second.outcome());

        if let RunHandle::Leader { .. } = first {
            first.finish(RunOutcome::Success);
        }

        assert!(matches!(
            joined_outcome.await.unwrap(),
            RunOutcome::Success
        ));
    }

    #[tokio::test]
    async fn registry_allows_a_fresh_run_after_completion() {
        let registry = RunRegistry::new();
        let first = registry.start_or_join(1);
        first.finish(RunOutcome::Success);

        let second = registry.start_or_join(1);
        assert!(matches!(second, RunHandle::Leader { .. }));
    }
}
