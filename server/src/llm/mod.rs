//! LLM Client (C1).
//!
//! Talks to a single configured provider endpoint per model, normalizing
//! whatever shape it returns into a strict `LlmScoreResult`. The Ensemble
//! Executor is the only caller; it owns retries, backoff and escalation.

mod http;
mod limiter;
mod parse;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::Article;

pub use http::HttpLlmClient;
pub use limiter::ProviderLimiter;

/// A single model's parsed contribution, before composite aggregation.
#[derive(Debug, Clone)]
pub struct LlmScoreResult {
    pub raw_score: f64,
    pub confidence: f64,
    pub explanation: String,
    pub raw_response_excerpt: String,
}

/// Failure modes from a single LLM call, per spec.md §7's taxonomy. The
/// Executor inspects [`LlmError::kind`] to decide retry vs. escalate vs.
/// give up, without needing to match on the full enum.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("network error calling {model}: {source}")]
    Network {
        model: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {model} timed out")]
    Timeout { model: String },

    #[error("{model} rate limited us")]
    RateLimited { model: String },

    #[error("authentication rejected for {model}")]
    Auth { model: String },

    #[error("{model} returned HTTP {status}")]
    HttpStatus { model: String, status: u16 },

    #[error("could not extract a JSON object from {model}'s response: {reason}")]
    ParseError { model: String, reason: String },

    #[error("{model}'s response did not match the expected score schema: {reason}")]
    SchemaError { model: String, reason: String },
}

impl LlmError {
    /// Machine-stable classification used for retry/escalation decisions
    /// and for the `error_class` column on `attempt_logs`.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Timeout { .. } => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Auth { .. } => "auth",
            Self::HttpStatus { .. } => "http_status",
            Self::ParseError { .. } => "parse_error",
            Self::SchemaError { .. } => "schema_error",
        }
    }

    /// Whether a retry with backoff (rather than a stricter prompt or an
    /// escalation) is the right response to this failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } | Self::RateLimited { .. } => true,
            Self::HttpStatus { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }

    /// Whether retrying this exact call (even with a stricter prompt) can
    /// ever help — permanent failures should escalate or give up instead.
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

/// One call to one model for one article. Implementations own their own
/// transport and per-provider rate limiting.
///
/// `min_score`/`max_score` come from `ScoreConfig` and must be applied by
/// the implementation before returning (spec.md §4.1 step 3), so
/// `LlmScoreResult.raw_score` is always within bounds regardless of what
/// the model actually said — callers never need to re-check it.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn score(
        &self,
        article: &Article,
        model_name: &str,
        prompt_variant: &str,
        min_score: f64,
        max_score: f64,
    ) -> Result<LlmScoreResult, LlmError>;
}
