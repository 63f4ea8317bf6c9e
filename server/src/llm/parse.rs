//! Two-stage response parsing: pull a JSON object out of whatever prose or
//! markdown fencing the model wrapped it in, then validate it against the
//! strict score schema. Modeled on the judge-response handling in
//! `agentreplay-evals`'s `LLMResponse::as_json`, generalized to tolerate
//! fenced code blocks since not every provider honors `response_format`.

use serde::Deserialize;

use super::LlmError;

#[derive(Debug, Deserialize)]
struct ScorePayload {
    score: f64,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    explanation: String,
}

fn default_confidence() -> f64 {
    1.0
}

/// Extract the first JSON object from `text`, preferring a fenced
/// ` ```json ... ``` ` block if one is present, otherwise scanning for the
/// first balanced `{...}` span.
fn extract_json_slice(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let after = &text[start + "```json".len()..];
        if let Some(end) = after.find("```") {
            return Some(after[..end].trim());
        }
    }
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        if let Some(end) = after.find("```") {
            let candidate = after[..end].trim();
            if candidate.starts_with('{') {
                return Some(candidate);
            }
        }
    }

    let start = text.find('{')?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a raw model response into `(raw_score, confidence, explanation)`.
///
/// # Errors
/// Returns [`LlmError::ParseError`] when no JSON object can be located, or
/// [`LlmError::SchemaError`] when one is found but doesn't match the
/// required `{score, confidence?, explanation?}` shape.
pub fn parse_score_response(model: &str, text: &str) -> Result<(f64, f64, String), LlmError> {
    let slice = extract_json_slice(text).ok_or_else(|| LlmError::ParseError {
        model: model.to_string(),
        reason: "no JSON object found in response".to_string(),
    })?;

    let payload: ScorePayload =
        serde_json::from_str(slice).map_err(|e| LlmError::SchemaError {
            model: model.to_string(),
            reason: e.to_string(),
        })?;

    if !payload.score.is_finite() {
        return Err(LlmError::SchemaError {
            model: model.to_string(),
            reason: "score is not a finite number".to_string(),
        });
    }

    Ok((payload.score, payload.confidence, payload.explanation))
}
