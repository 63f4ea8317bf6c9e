//! Per-provider concurrency limiting.
//!
//! The spec scopes real request-rate limiting to the provider side (Non-goal,
//! spec.md §4.1); what the Core owns is keeping its own concurrent call count
//! per model within the configured bound. In-process `Semaphore`s stand in
//! for the teacher's Redis-backed [`RateLimiter`](crate) here since there is
//! no shared state to coordinate across processes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

/// Caps concurrent in-flight calls per model name.
pub struct ProviderLimiter {
    max_per_model: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl ProviderLimiter {
    #[must_use]
    pub fn new(max_per_model: usize) -> Self {
        Self {
            max_per_model,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    fn semaphore_for(&self, model_name: &str) -> Arc<Semaphore> {
        let mut guard = self.semaphores.lock();
        guard
            .entry(model_name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_model)))
            .clone()
    }

    /// Acquire a permit for `model_name`, waiting if the model is already at
    /// its concurrency cap. The returned permit must be held for the
    /// duration of the call.
    pub async fn acquire(&self, model_name: &str) -> OwnedPermit {
        let sem = self.semaphore_for(model_name);
        let permit = sem
            .acquire_owned()
            .await
            .expect("semaphore is never closed");
        OwnedPermit { _permit: permit }
    }
}

/// RAII guard releasing the per-model slot on drop.
pub struct OwnedPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limits_concurrency_per_model() {
        let limiter = Arc::new(ProviderLimiter::new(1));
        let _first = limiter.acquire("gpt").await;

        let limiter2 = limiter.clone();
        let handle = tokio::spawn(async move {
            let _second = limiter2.acquire("gpt").await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
    }

    #[tokio::test]
    async fn different_models_do_not_contend() {
        let limiter = ProviderLimiter::new(1);
        let _a = limiter.acquire("gpt").await;
        let _b = limiter.acquire("claude").await;
    }
}
