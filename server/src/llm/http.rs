//! HTTP-backed [`LlmClient`] talking to an OpenAI-compatible chat completion
//! endpoint. Credentials and endpoint come from `ScoringConfig` (env-sourced
//! only, per spec.md §5); model selection comes entirely from
//! `composite_score_config.json`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::limiter::ProviderLimiter;
use super::parse::parse_score_response;
use super::{LlmClient, LlmError, LlmScoreResult};
use crate::db::Article;

const EXCERPT_LEN: usize = 500;

/// Prompt template selected by the Ensemble Executor. `Default` is the
/// normal first-attempt prompt; `Strict` is used on a parse-error retry and
/// asks the model to emit nothing but the JSON object.
fn build_prompt(article: &Article, prompt_variant: &str) -> String {
    let instructions = match prompt_variant {
        "strict" => {
            "Respond with ONLY a single JSON object and no other text: \
             {\"score\": <float -1..1>, \"confidence\": <float 0..1>, \"explanation\": <string>}."
        }
        _ => {
            "Analyze the political bias of this article on a scale from -1 \
             (strongly left) to 1 (strongly right), with 0 being neutral. \
             Respond with a JSON object: \
             {\"score\": <float>, \"confidence\": <float 0..1>, \"explanation\": <string>}."
        }
    };

    format!(
        "{instructions}\n\nTitle: {}\n\nContent: {}",
        article.title, article.content
    )
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct HttpLlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    limiter: Arc<ProviderLimiter>,
}

impl HttpLlmClient {
    #[must_use]
    pub fn new(
        base_url: String,
        api_key: Option<String>,
        timeout: Duration,
        max_concurrent_per_model: usize,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client config is static and valid");

        Self {
            http,
            base_url,
            api_key,
            limiter: Arc::new(ProviderLimiter::new(max_concurrent_per_model)),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn score(
        &self,
        article: &Article,
        model_name: &str,
        prompt_variant: &str,
        min_score: f64,
        max_score: f64,
    ) -> Result<LlmScoreResult, LlmError> {
        let _permit = self.limiter.acquire(model_name).await;

        let prompt = build_prompt(article, prompt_variant);
        let body = ChatRequest {
            model: model_name,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: 0.0,
        };

        let mut request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| classify_transport(model_name, e))?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(LlmError::Auth {
                model: model_name.to_string(),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited {
                model: model_name.to_string(),
            });
        }
        if !status.is_success() {
            return Err(LlmError::HttpStatus {
                model: model_name.to_string(),
                status: status.as_u16(),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| classify_transport(model_name, e))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::SchemaError {
                model: model_name.to_string(),
                reason: "response had no choices".to_string(),
            })?;

        let (raw_score, confidence, explanation) = parse_score_response(model_name, &content)?;
        let excerpt: String = content.chars().take(EXCERPT_LEN).collect();

        Ok(LlmScoreResult {
            raw_score: raw_score.clamp(min_score, max_score),
            confidence,
            explanation,
            raw_response_excerpt: excerpt,
        })
    }
}

fn classify_transport(model_name: &str, err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout {
            model: model_name.to_string(),
        }
    } else {
        LlmError::Network {
            model: model_name.to_string(),
            source: err,
        }
    }
}
