//! Composite Calculator (C2).
//!
//! Pure aggregation of per-model scores into a single composite + confidence.
//! Given identical inputs and config this always returns identical output —
//! no I/O, no clock, no randomness.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::score_config::{Formula, HandleInvalid, Perspective, ScoreConfig};

/// Outcome of parsing a single LLM response, carried through to aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "parse_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Ok,
    FallbackDefault,
    ParseError,
}

/// One model's contribution to the ensemble, ready for aggregation.
#[derive(Debug, Clone)]
pub struct ModelScore {
    pub perspective: Perspective,
    pub model_name: String,
    pub raw_score: f64,
    pub confidence: f64,
    pub parse_status: ParseStatus,
}

/// Result of the Composite Calculator.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeResult {
    pub composite: f64,
    pub confidence: f64,
    pub n_used: usize,
}

/// Errors from composite computation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompositeError {
    /// No usable per-model scores survived filtering.
    #[error("no usable scores after filtering")]
    IncompleteScore,
}

/// Filter + aggregate `scores` per `config` into a single composite value.
///
/// # Errors
/// Returns [`CompositeError::IncompleteScore`] when every input score is
/// dropped by filtering — callers must not synthesize a zero composite in
/// that case; the caller decides whether to fall back to recency-only
/// ranking or mark the article as unreliable.
pub fn compute(
    scores: &[ModelScore],
    config: &ScoreConfig,
) -> Result<CompositeResult, CompositeError> {
    let filtered = filter_scores(scores, config);

    if filtered.is_empty() {
        return Err(CompositeError::IncompleteScore);
    }

    let (composite, confidence) = match config.formula {
        Formula::Average => average(&filtered),
        Formula::WeightedAverage => weighted_average(&filtered, config),
        Formula::OneMinusAbsAverage => one_minus_abs_average(&filtered),
    };

    Ok(CompositeResult {
        composite: composite.clamp(config.min_score, config.max_score),
        confidence: confidence.clamp(0.0, 1.0),
        n_used: filtered.len(),
    })
}

/// Apply the input-filtering rules from the spec, in order: drop non-`ok`
/// parses, apply the configured out-of-bounds policy (ignore / clamp /
/// default_zero), then drop zero-confidence scores. `default_zero`
/// substitutes `confidence=0` for an out-of-bounds score, which the
/// following zero-confidence rule then drops — making it a stronger
/// `ignore`, per spec.
fn filter_scores(scores: &[ModelScore], config: &ScoreConfig) -> Vec<ModelScore> {
    scores
        .iter()
        .filter(|s| s.parse_status == ParseStatus::Ok)
        .filter_map(|s| apply_bounds_policy(s, config))
        .filter(|s| s.confidence > 0.0)
        .collect()
}

/// Apply `handle_invalid` to a single score. Returns `None` when the score
/// is dropped outright (out-of-bounds under `Ignore`).
fn apply_bounds_policy(score: &ModelScore, config: &ScoreConfig) -> Option<ModelScore> {
    let in_bounds = score.raw_score >= config.min_score && score.raw_score <= config.max_score;
    if in_bounds {
        return Some(score.clone());
    }

    match config.handle_invalid {
        HandleInvalid::Ignore => None,
        HandleInvalid::Clamp => {
            let mut clamped = score.clone();
            clamped.raw_score = score.raw_score.clamp(config.min_score, config.max_score);
            Some(clamped)
        }
        HandleInvalid::DefaultZero => {
            let mut zeroed = score.clone();
            zeroed.raw_score = 0.0;
            zeroed.confidence = 0.0;
            Some(zeroed)
        }
    }
}

fn average(scores: &[ModelScore]) -> (f64, f64) {
    let n = scores.len() as f64;
    let composite = scores.iter().map(|s| s.raw_score).sum::<f64>() / n;
    let confidence = scores.iter().map(|s| s.confidence).sum::<f64>() / n;
    (composite, confidence)
}

fn weighted_average(scores: &[ModelScore], config: &ScoreConfig) -> (f64, f64) {
    let weights: Vec<f64> = scores
        .iter()
        .map(|s| weight_for(s, config))
        .collect();
    let total_weight: f64 = weights.iter().sum();

    if total_weight <= 0.0 {
        // No matching weight configuration survived; degrade to a plain
        // average rather than dividing by zero.
        return average(scores);
    }

    let composite = scores
        .iter()
        .zip(&weights)
        .map(|(s, w)| s.raw_score * w)
        .sum::<f64>()
        / total_weight;
    let confidence = scores
        .iter()
        .zip(&weights)
        .map(|(s, w)| s.confidence * w)
        .sum::<f64>()
        / total_weight;
    (composite, confidence)
}

fn weight_for(score: &ModelScore, config: &ScoreConfig) -> f64 {
    config
        .models
        .iter()
        .find(|m| m.perspective == score.perspective && m.model_name == score.model_name)
        .map_or(0.0, |m| m.weight)
}

fn one_minus_abs_average(scores: &[ModelScore]) -> (f64, f64) {
    let n = scores.len() as f64;
    let mean_raw = scores.iter().map(|s| s.raw_score).sum::<f64>() / n;
    let confidence = scores.iter().map(|s| s.confidence).sum::<f64>() / n;
    (1.0 - mean_raw.abs(), confidence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::score_config::{HandleInvalid, ModelEntry};

    fn score(perspective: Perspective, model: &str, raw: f64, conf: f64) -> ModelScore {
        ModelScore {
            perspective,
            model_name: model.to_string(),
            raw_score: raw,
            confidence: conf,
            parse_status: ParseStatus::Ok,
        }
    }

    fn config(formula: Formula, handle_invalid: HandleInvalid) -> ScoreConfig {
        ScoreConfig {
            models: vec![
                ModelEntry {
                    perspective: Perspective::Left,
                    model_name: "left-model".into(),
                    prompt_variant: "default".into(),
                    weight: 2.0,
                    escalation_tier: 0,
                },
                ModelEntry {
                    perspective: Perspective::Center,
                    model_name: "center-model".into(),
                    prompt_variant: "default".into(),
                    weight: 1.0,
                    escalation_tier: 0,
                },
                ModelEntry {
                    perspective: Perspective::Right,
                    model_name: "right-model".into(),
                    prompt_variant: "default".into(),
                    weight: 1.0,
                    escalation_tier: 0,
                },
            ],
            formula,
            min_score: -1.0,
            max_score: 1.0,
            handle_invalid,
            min_confidence_floor: 0.0,
            concurrency: None,
        }
    }

    /// Scenario 1 from spec.md §8: left=-0.8(c=0.9), center=0.0(c=0.8),
    /// right=0.6(c=0.7), formula=average.
    #[test]
    fn happy_path_average() {
        let scores = vec![
            score(Perspective::Left, "left-model", -0.8, 0.9),
            score(Perspective::Center, "center-model", 0.0, 0.8),
            score(Perspective::Right, "right-model", 0.6, 0.7),
        ];
        let cfg = config(Formula::Average, HandleInvalid::Ignore);
        let result = compute(&scores, &cfg).unwrap();
        assert!((result.composite - (-0.0667)).abs() < 1e-3);
        assert!((result.confidence - 0.8).abs() < 1e-9);
        assert_eq!(result.n_used, 3);
    }

    #[test]
    fn parse_errors_are_excluded() {
        let mut scores = vec![
            score(Perspective::Left, "left-model", -0.8, 0.9),
            score(Perspective::Center, "center-model", 0.0, 0.8),
        ];
        scores.push(ModelScore {
            parse_status: ParseStatus::ParseError,
            ..score(Perspective::Right, "right-model", 0.9, 0.9)
        });
        let cfg = config(Formula::Average, HandleInvalid::Ignore);
        let result = compute(&scores, &cfg).unwrap();
        assert_eq!(result.n_used, 2);
    }

    #[test]
    fn zero_confidence_is_dropped() {
        let scores = vec![
            score(Perspective::Left, "left-model", -0.8, 0.9),
            score(Perspective::Center, "center-model", 0.0, 0.0),
        ];
        let cfg = config(Formula::Average, HandleInvalid::Ignore);
        let result = compute(&scores, &cfg).unwrap();
        assert_eq!(result.n_used, 1);
    }

    #[test]
    fn empty_after_filtering_is_incomplete() {
        let scores = vec![ModelScore {
            parse_status: ParseStatus::ParseError,
            ..score(Perspective::Left, "left-model", -0.8, 0.9)
        }];
        let cfg = config(Formula::Average, HandleInvalid::Ignore);
        assert_eq!(compute(&scores, &cfg), Err(CompositeError::IncompleteScore));
    }

    #[test]
    fn out_of_bounds_clamp() {
        let scores = vec![score(Perspective::Left, "left-model", 1.4, 0.9)];
        let cfg = config(Formula::Average, HandleInvalid::Clamp);
        let result = compute(&scores, &cfg).unwrap();
        assert!((result.composite - 1.0).abs() < 1e-9);
    }

    #[test]
    fn out_of_bounds_ignore_drops_it() {
        let scores = vec![
            score(Perspective::Left, "left-model", 1.4, 0.9),
            score(Perspective::Center, "center-model", 0.2, 0.8),
        ];
        let cfg = config(Formula::Average, HandleInvalid::Ignore);
        let result = compute(&scores, &cfg).unwrap();
        assert_eq!(result.n_used, 1);
    }

    #[test]
    fn default_zero_acts_as_stronger_ignore() {
        let scores = vec![
            score(Perspective::Left, "left-model", 1.4, 0.9),
            score(Perspective::Center, "center-model", 0.2, 0.8),
        ];
        let cfg = config(Formula::Average, HandleInvalid::DefaultZero);
        let result = compute(&scores, &cfg).unwrap();
        assert_eq!(result.n_used, 1);
    }

    #[test]
    fn weighted_average_normalizes_over_present_models() {
        let scores = vec![
            score(Perspective::Left, "left-model", -1.0, 1.0),
            score(Perspective::Center, "center-model", 1.0, 1.0),
        ];
        let cfg = config(Formula::WeightedAverage, HandleInvalid::Ignore);
        // weight left=2, center=1 => (-1*2 + 1*1) / 3 = -1/3
        let result = compute(&scores, &cfg).unwrap();
        assert!((result.composite - (-1.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn one_minus_abs_average_is_a_balance_metric() {
        let scores = vec![
            score(Perspective::Left, "left-model", -0.5, 0.8),
            score(Perspective::Right, "right-model", 0.5, 0.8),
        ];
        let cfg = config(Formula::OneMinusAbsAverage, HandleInvalid::Ignore);
        let result = compute(&scores, &cfg).unwrap();
        // mean raw = 0.0, so balance = 1 - |0| = 1
        assert!((result.composite - 1.0).abs() < 1e-9);
    }

    #[test]
    fn deterministic_for_identical_input() {
        let scores = vec![
            score(Perspective::Left, "left-model", -0.3, 0.6),
            score(Perspective::Center, "center-model", 0.1, 0.7),
        ];
        let cfg = config(Formula::Average, HandleInvalid::Ignore);
        assert_eq!(compute(&scores, &cfg), compute(&scores, &cfg));
    }
}
