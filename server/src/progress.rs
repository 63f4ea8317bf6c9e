//! Progress Tracker (C4).
//!
//! In-memory only: `article_id -> ProgressState` plus a per-article
//! subscriber registry. The Executor is the sole writer for a given
//! article's run; this module only owns fan-out and cleanup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Run status. `InProgress` may repeat; exactly one terminal event
/// (`Success` xor `Error`) ends a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Success,
    Error,
}

/// One snapshot of a run, pushed to subscribers and readable via
/// `GET /score-progress/{article_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressState {
    pub article_id: i64,
    pub step: String,
    pub message: String,
    pub percent: u8,
    pub status: RunStatus,
    pub error: Option<String>,
    pub final_score: Option<f64>,
}

impl ProgressState {
    #[must_use]
    pub fn starting(article_id: i64) -> Self {
        Self {
            article_id,
            step: "Starting".to_string(),
            message: String::new(),
            percent: 0,
            status: RunStatus::InProgress,
            error: None,
            final_score: None,
        }
    }

    #[must_use]
    pub fn in_progress(article_id: i64, step: impl Into<String>, percent: u8) -> Self {
        Self {
            article_id,
            step: step.into(),
            message: String::new(),
            percent,
            status: RunStatus::InProgress,
            error: None,
            final_score: None,
        }
    }

    #[must_use]
    pub fn success(article_id: i64, final_score: f64) -> Self {
        Self {
            article_id,
            step: "Complete".to_string(),
            message: String::new(),
            percent: 100,
            status: RunStatus::Success,
            error: None,
            final_score: Some(final_score),
        }
    }

    #[must_use]
    pub fn error(article_id: i64, reason: impl Into<String>) -> Self {
        Self {
            article_id,
            step: "Failed".to_string(),
            message: String::new(),
            percent: 100,
            status: RunStatus::Error,
            error: Some(reason.into()),
            final_score: None,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, RunStatus::Success | RunStatus::Error)
    }

    /// Explicit overflow notice sent to a subscriber being dropped for
    /// falling behind, per spec.md §4.4.
    #[must_use]
    pub fn overflow(article_id: i64) -> Self {
        Self {
            article_id,
            step: "Overflow".to_string(),
            message: "subscriber queue overflowed, disconnecting".to_string(),
            percent: 0,
            status: RunStatus::Error,
            error: Some("subscriber_overflow".to_string()),
            final_score: None,
        }
    }
}

/// Handle returned from `subscribe`. Dropping it unregisters the
/// subscriber and frees its queue slot.
pub struct Subscriber {
    id: u64,
    article_id: i64,
    receiver: mpsc::Receiver<ProgressState>,
    tracker: Arc<ProgressTrackerInner>,
}

impl Subscriber {
    pub async fn recv(&mut self) -> Option<ProgressState> {
        self.receiver.recv().await
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.tracker.remove_subscriber(self.article_id, self.id);
    }
}

struct Registered {
    id: u64,
    sender: mpsc::Sender<ProgressState>,
}

struct ArticleEntry {
    state: ProgressState,
    last_updated: Instant,
    subscribers: Vec<Registered>,
}

struct ProgressTrackerInner {
    entries: DashMap<i64, ArticleEntry>,
    next_subscriber_id: AtomicU64,
    queue_depth: usize,
    grace_period: Duration,
}

impl ProgressTrackerInner {
    fn remove_subscriber(&self, article_id: i64, subscriber_id: u64) {
        if let Some(mut entry) = self.entries.get_mut(&article_id) {
            entry.subscribers.retain(|s| s.id != subscriber_id);
        }
    }
}

/// Shared handle; cheap to clone, safe under concurrent access from the
/// Executor (writer), API handlers (subscribers), and the cleanup task.
#[derive(Clone)]
pub struct ProgressTracker {
    inner: Arc<ProgressTrackerInner>,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(grace_period: Duration, queue_depth: usize) -> Self {
        Self {
            inner: Arc::new(ProgressTrackerInner {
                entries: DashMap::new(),
                next_subscriber_id: AtomicU64::new(0),
                queue_depth,
                grace_period,
            }),
        }
    }

    /// Atomically replace the state for `article_id` and fan it out to
    /// every current subscriber without blocking on any of them.
    pub fn set(&self, state: ProgressState) {
        let article_id = state.article_id;
        let mut entry = self.inner.entries.entry(article_id).or_insert_with(|| ArticleEntry {
            state: state.clone(),
            last_updated: Instant::now(),
            subscribers: Vec::new(),
        });
        entry.state = state.clone();
        entry.last_updated = Instant::now();

        entry.subscribers.retain(|sub| match sub.sender.try_send(state.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = sub.sender.try_send(ProgressState::overflow(article_id));
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Register a new subscriber, immediately delivering the current
    /// snapshot if one exists.
    pub fn subscribe(&self, article_id: i64) -> Subscriber {
        let (tx, rx) = mpsc::channel(self.inner.queue_depth);
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);

        if let Some(mut entry) = self.inner.entries.get_mut(&article_id) {
            let _ = tx.try_send(entry.state.clone());
            entry.subscribers.push(Registered {
                id,
                sender: tx,
            });
        } else {
            self.inner.entries.insert(
                article_id,
                ArticleEntry {
                    state: ProgressState::starting(article_id),
                    last_updated: Instant::now(),
                    subscribers: vec![Registered { id, sender: tx }],
                },
            );
        }

        Subscriber {
            id,
            article_id,
            receiver: rx,
            tracker: self.inner.clone(),
        }
    }

    #[must_use]
    pub fn snapshot(&self, article_id: i64) -> Option<ProgressState> {
        self.inner.entries.get(&article_id).map(|e| e.state.clone())
    }

    /// Remove terminal entries older than the grace period with no
    /// remaining live subscribers. Run periodically from a background task.
    pub fn sweep(&self) {
        let grace = self.inner.grace_period;
        let before = self.inner.entries.len();
        self.inner.entries.retain(|_, entry| {
            !(entry.state.is_terminal()
                && entry.last_updated.elapsed() > grace
                && entry.subscribers.is_empty())
        });
        let removed = before - self.inner.entries.len();
        if removed > 0 {
            debug!(removed, "progress tracker swept stale entries");
        }
    }

    /// Spawn the periodic cleanup task. Returns its `JoinHandle` so callers
    /// can abort it on shutdown if they choose to.
    pub fn spawn_cleanup_task(self, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_current_snapshot_immediately() {
        let tracker = ProgressTracker::new(Duration::from_secs(300), 8);
        tracker.set(ProgressState::in_progress(1, "Scoring", 10));

        let mut sub = tracker.subscribe(1);
        let first = sub.recv().await.unwrap();
        assert_eq!(first.percent, 10);
    }

    #[tokio::test]
    async fn events_fan_out_to_all_subscribers() {
        let tracker = ProgressTracker::new(Duration::from_secs(300), 8);
        let mut a = tracker.subscribe(1);
        let mut b = tracker.subscribe(1);

        tracker.set(ProgressState::success(1, 0.2));

        assert_eq!(a.recv().await.unwrap().status, RunStatus::Success);
        assert_eq!(b.recv().await.unwrap().status, RunStatus::Success);
    }

    #[tokio::test]
    async fn full_queue_drops_subscriber_with_overflow_event() {
        let tracker = ProgressTracker::new(Duration::from_secs(300), 1);
        let mut sub = tracker.subscribe(1);

        for i in 0..5 {
            tracker.set(ProgressState::in_progress(1, "Scoring", i));
        }

        // Drain until we hit the overflow marker rather than asserting a
        // single fixed frame, since the exact point of overflow depends on
        // scheduling of the bounded channel.
        let mut saw_overflow = false;
        while let Some(state) = sub.recv().await {
            if state.error.as_deref() == Some("subscriber_overflow") {
                saw_overflow = true;
                break;
            }
        }
        assert!(saw_overflow);
    }

    #[tokio::test]
    async fn sweep_removes_stale_terminal_entries_without_subscribers() {
        let tracker = ProgressTracker::new(Duration::from_millis(1), 8);
        tracker.set(ProgressState::success(1, 0.5));
        tokio::time::sleep(Duration::from_millis(5)).await;

        tracker.sweep();
        assert!(tracker.snapshot(1).is_none());
    }

    #[tokio::test]
    async fn sweep_keeps_entries_with_live_subscribers() {
        let tracker = ProgressTracker::new(Duration::from_millis(1), 8);
        let _sub = tracker.subscribe(1);
        tracker.set(ProgressState::success(1, 0.5));
        tokio::time::sleep(Duration::from_millis(5)).await;

        tracker.sweep();
        assert!(tracker.snapshot(1).is_some());
    }
}
