use crate::modules::config::PipelineConfig;
use async_trait::async_trait;
use reqwest::StatusCode;
use scout_protocol::Secret;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("gemini request failed: status={status} body={body}")]
    BadStatus { status: StatusCode, body: String },
    #[error("gemini auth error: {0}")]
    Auth(String),
    #[error("gemini response parse failed: {0}")]
    Parse(String),
}

/// A model that answers a prompt with one JSON document (as text).
#[async_trait]
pub trait JsonModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn generate_json(&self, prompt: &str, schema: Option<&Value>)
        -> Result<String, GeminiError>;
}

pub struct GeminiClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Secret,
    attempts: u32,
}

impl GeminiClient {
    pub fn new(config: &PipelineConfig, model: &str, api_key: Secret) -> Result<Self, GeminiError> {
        let client = reqwest::Client::builder()
            .timeout(config.ai_timeout_for(model))
            .build()?;
        let endpoint = PipelineConfig::endpoint(
            &config.gemini_base_url,
            &format!("models/{model}:generateContent"),
        );
        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            api_key,
            attempts: config.ai_attempts.max(1),
        })
    }

    fn payload(prompt: &str, schema: Option<&Value>) -> Value {
        let mut generation = json!({
            "responseMimeType": "application/json",
            "temperature": 0,
            "maxOutputTokens": 4096
        });
        if let Some(schema) = schema {
            generation["responseJsonSchema"] = schema.clone();
        }
        json!({
            "contents": [
                { "role": "user", "parts": [ { "text": prompt } ] }
            ],
            "generationConfig": generation
        })
    }
}

#[async_trait]
impl JsonModel for GeminiClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate_json(
        &self,
        prompt: &str,
        schema: Option<&Value>,
    ) -> Result<String, GeminiError> {
        let with_schema = Self::payload(prompt, schema);
        let without_schema = Self::payload(prompt, None);
        let mut use_schema = schema.is_some();

        let mut backoff = Duration::from_millis(500);
        let mut attempt: u32 = 1;
        loop {
            let resp = self
                .client
                .post(&self.endpoint)
                .header("x-goog-api-key", self.api_key.expose())
                .json(if use_schema { &with_schema } else { &without_schema })
                .send()
                .await;

            let resp = match resp {
                Ok(r) => r,
                Err(e) if (e.is_timeout() || e.is_connect()) && attempt < self.attempts => {
                    warn!(attempt, error = %e, "gemini transport error, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(5));
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(GeminiError::Http(e.without_url())),
            };

            if resp.status().is_success() {
                let body = resp.text().await?;
                debug!(model = %self.model, bytes = body.len(), "gemini response");
                return extract_candidate_text(&body).map_err(GeminiError::Parse);
            }

            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(GeminiError::Auth(format!(
                    "Gemini rejected the API key (status={status})"
                )));
            }

            // Some endpoints reject schema fields; resend once without schema.
            // The resend does not consume an attempt.
            if use_schema
                && status == StatusCode::BAD_REQUEST
                && body.to_ascii_lowercase().contains("unknown")
            {
                use_schema = false;
                continue;
            }

            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if !retryable || attempt >= self.attempts {
                return Err(GeminiError::BadStatus { status, body });
            }
            warn!(attempt, %status, "gemini retryable status");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(Duration::from_secs(5));
            attempt += 1;
        }
    }
}

/// Concatenates the text parts of the first candidate.
pub fn extract_candidate_text(body: &str) -> Result<String, String> {
    #[derive(Deserialize)]
    struct Envelope {
        candidates: Option<Vec<Candidate>>,
    }
    #[derive(Deserialize)]
    struct Candidate {
        content: Option<Content>,
        #[serde(rename = "finishReason")]
        finish_reason: Option<String>,
    }
    #[derive(Deserialize)]
    struct Content {
        parts: Option<Vec<Part>>,
    }
    #[derive(Deserialize)]
    struct Part {
        text: Option<String>,
    }

    let env: Envelope = serde_json::from_str(body).map_err(|e| format!("{e}"))?;
    let candidate = env
        .candidates
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| "response has no candidates".to_string())?;
    let reason = candidate.finish_reason.unwrap_or_default();
    let text: String = candidate
        .content
        .and_then(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.text)
        .collect();
    if text.trim().is_empty() {
        return Err(format!("candidate has no text (finishReason={reason:?})"));
    }
    Ok(text)
}

/// Pulls a JSON object out of model text: bare, fenced, or embedded in prose.
pub fn extract_json_like(text: &str) -> Option<&str> {
    let t = text.trim();
    if t.starts_with('{') && t.ends_with('}') {
        return Some(t);
    }

    if let Some(stripped) = t.strip_prefix("```") {
        let stripped = stripped.trim_start();
        let stripped = stripped.strip_prefix("json").unwrap_or(stripped).trim_start();
        let stripped = stripped.strip_suffix("```").unwrap_or(stripped).trim();
        if stripped.starts_with('{') && stripped.ends_with('}') {
            return Some(stripped);
        }
    }

    let start = t.find('{')?;
    let end = t.rfind('}')?;
    if end > start {
        Some(&t[start..=end])
    } else {
        None
    }
}
