//! Model matrix and aggregation configuration.
//!
//! Loaded once at startup from `composite_score_config.json`. Model
//! *selection* lives here and only here — never in environment variables
//! (spec invariant, see `config::ScoringConfig`).

use serde::{Deserialize, Serialize};
use std::fs;
use thiserror::Error;

/// One of the three perspectives a model is prompted to evaluate along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "perspective", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Perspective {
    Left,
    Center,
    Right,
}

impl Perspective {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Center => "center",
            Self::Right => "right",
        }
    }
}

impl std::fmt::Display for Perspective {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in the configured scoring matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub perspective: Perspective,
    #[serde(rename = "modelName")]
    pub model_name: String,
    #[serde(rename = "promptVariant")]
    pub prompt_variant: String,
    pub weight: f64,
    #[serde(rename = "escalationTier")]
    pub escalation_tier: u32,
}

/// Formula used by the Composite Calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formula {
    Average,
    WeightedAverage,
    OneMinusAbsAverage,
}

/// Strategy for handling a per-model score outside `[min_score, max_score]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleInvalid {
    Ignore,
    Clamp,
    DefaultZero,
}

/// Retry/backoff/concurrency tuning embedded in the same config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Concurrency {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_models: usize,
}

const fn default_max_concurrent() -> usize {
    4
}

/// Full `composite_score_config.json` document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreConfig {
    pub models: Vec<ModelEntry>,
    pub formula: Formula,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
    pub handle_invalid: HandleInvalid,
    #[serde(default)]
    pub min_confidence_floor: f64,
    #[serde(default)]
    pub concurrency: Option<Concurrency>,
}

const fn default_min_score() -> f64 {
    -1.0
}

const fn default_max_score() -> f64 {
    1.0
}

/// Errors surfaced while loading or validating the score config.
#[derive(Debug, Error)]
pub enum ScoreConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("score config has an empty `models` list")]
    EmptyModels,

    #[error("perspective {0} has no configured model")]
    MissingPerspective(Perspective),

    #[error("min_score ({min}) must be less than max_score ({max})")]
    InvalidBounds { min: f64, max: f64 },

    #[error("model entry for {model} has non-positive weight {weight}")]
    InvalidWeight { model: String, weight: f64 },
}

impl ScoreConfig {
    /// Returns the configured models for a given perspective, ordered by
    /// ascending escalation tier (tier 0 first).
    #[must_use]
    pub fn models_for(&self, perspective: Perspective) -> Vec<&ModelEntry> {
        let mut entries: Vec<&ModelEntry> = self
            .models
            .iter()
            .filter(|m| m.perspective == perspective)
            .collect();
        entries.sort_by_key(|m| m.escalation_tier);
        entries
    }

    /// Tier-0 entries only — the primary matrix the Executor dispatches
    /// against before any escalation.
    #[must_use]
    pub fn tier0_models(&self) -> Vec<&ModelEntry> {
        self.models.iter().filter(|m| m.escalation_tier == 0).collect()
    }

    /// For each perspective, the lowest-tier entry at or above `min_tier` —
    /// falling back to that perspective's highest available tier if none
    /// reaches `min_tier`. `min_tier = 0` is equivalent to [`Self::tier0_models`].
    ///
    /// Used by the Scheduler's escalation path (spec.md §4.6): once an
    /// article's `fail_count` crosses `scheduler_escalation_threshold`, the
    /// next run skips tier 0 and dispatches directly against a higher tier.
    #[must_use]
    pub fn models_at_or_above(&self, min_tier: u32) -> Vec<&ModelEntry> {
        [Perspective::Left, Perspective::Center, Perspective::Right]
            .into_iter()
            .filter_map(|perspective| {
                let candidates = self.models_for(perspective);
                candidates
                    .iter()
                    .find(|m| m.escalation_tier >= min_tier)
                    .or_else(|| candidates.last())
                    .copied()
            })
            .collect()
    }

    fn validate(&self) -> Result<(), ScoreConfigError> {
        if self.models.is_empty() {
            return Err(ScoreConfigError::EmptyModels);
        }
        if self.min_score >= self.max_score {
            return Err(ScoreConfigError::InvalidBounds {
                min: self.min_score,
                max: self.max_score,
            });
        }
        for perspective in [Perspective::Left, Perspective::Center, Perspective::Right] {
            if self.models_for(perspective).is_empty() {
                return Err(ScoreConfigError::MissingPerspective(perspective));
            }
        }
        for m in &self.models {
            if m.weight <= 0.0 {
                return Err(ScoreConfigError::InvalidWeight {
                    model: m.model_name.clone(),
                    weight: m.weight,
                });
            }
        }
        Ok(())
    }
}

/// Load and validate `composite_score_config.json` from `path`.
///
/// # Errors
/// Returns an error on I/O failure, malformed JSON, or a config that
/// violates the "at least one entry per perspective" / empty-models
/// invariants. Callers at startup should treat this as fatal.
pub fn load(path: &str) -> Result<ScoreConfig, ScoreConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ScoreConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    let cfg: ScoreConfig = serde_json::from_str(&raw).map_err(|source| ScoreConfigError::Parse {
        path: path.to_string(),
        source,
    })?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entry(perspective: Perspective, tier: u32) -> ModelEntry {
        ModelEntry {
            perspective,
            model_name: format!("model-{perspective}-{tier}"),
            prompt_variant: "default".into(),
            weight: 1.0,
            escalation_tier: tier,
        }
    }

    fn sample_config() -> ScoreConfig {
        ScoreConfig {
            models: vec![
                sample_entry(Perspective::Left, 0),
                sample_entry(Perspective::Center, 0),
                sample_entry(Perspective::Right, 0),
            ],
            formula: Formula::Average,
            min_score: -1.0,
            max_score: 1.0,
            handle_invalid: HandleInvalid::Ignore,
            min_confidence_floor: 0.0,
            concurrency: None,
        }
    }

    #[test]
    fn empty_models_is_rejected() {
        let mut cfg = sample_config();
        cfg.models.clear();
        assert!(matches!(cfg.validate(), Err(ScoreConfigError::EmptyModels)));
    }

    #[test]
    fn missing_perspective_is_rejected() {
        let mut cfg = sample_config();
        cfg.models.retain(|m| m.perspective != Perspective::Right);
        assert!(matches!(
            cfg.validate(),
            Err(ScoreConfigError::MissingPerspective(Perspective::Right))
        ));
    }

    #[test]
    fn valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn tier0_models_excludes_escalation_tiers() {
        let mut cfg = sample_config();
        cfg.models.push(sample_entry(Perspective::Left, 1));
        assert_eq!(cfg.tier0_models().len(), 3);
    }
}
