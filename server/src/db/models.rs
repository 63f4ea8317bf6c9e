//! Database Models
//!
//! Persisted shapes for the `articles` and `llm_scores` tables (see
//! `spec.md` §3 and §6). Article ingestion itself is an external
//! collaborator — the Core only reads and updates the score-related
//! columns on an existing row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::composite::ParseStatus;
use crate::score_config::Perspective;

/// Where an article's current `composite_score` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "score_source", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ScoreSource {
    Llm,
    Manual,
    None,
}

/// Article row (external data; the Core only mutates its score columns).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub source: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub pub_date: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub composite_score: Option<f64>,
    pub confidence: Option<f64>,
    pub score_source: ScoreSource,
    pub fail_count: i32,
    pub last_scored_at: Option<DateTime<Utc>>,
}

/// One versioned per-model score row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LlmScoreRow {
    pub id: i64,
    pub article_id: i64,
    pub version: i32,
    pub perspective: Perspective,
    pub model_name: String,
    pub raw_score: f64,
    pub confidence: f64,
    pub explanation: String,
    pub parse_status: ParseStatus,
    pub raw_response_excerpt: String,
    pub created_at: DateTime<Utc>,
}

/// Per-attempt diagnostic record (not on the correctness path).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AttemptLogRow {
    pub id: i64,
    pub article_id: i64,
    pub model_name: String,
    pub attempt: i32,
    pub prompt_variant: String,
    pub http_status: Option<i32>,
    pub latency_ms: i32,
    pub parse_outcome: String,
    pub error_class: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A fully-assembled final score, returned by the Score Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalScore {
    pub article_id: i64,
    pub version: i32,
    pub composite_score: f64,
    pub confidence: f64,
    pub score_source: ScoreSource,
}
