//! Generative model driver.
//!
//! The remote model is invoked in two modes: *extract* (one-shot JSON
//! structuring of a chunk) and *answer* (streamed response synthesis). Both
//! travel over the same REST surface; the streaming side parses SSE frames
//! off the byte stream.

use std::num::NonZeroU32;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API returned {status}: {details}")]
    Api { status: u16, details: String },

    #[error("model response malformed: {0}")]
    Malformed(String),
}

pub type AnswerStream = Pin<Box<dyn Stream<Item = Result<String, ModelError>> + Send>>;

/// Text-in / text-out model invoked in extract and answer modes.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Extract mode: one-shot generation, low temperature.
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;

    /// Answer mode: streamed fragments.
    async fn stream_answer(&self, prompt: &str) -> Result<AnswerStream, ModelError>;
}

// =============================================================================
// Extract-call pacing
// =============================================================================

/// Process-wide limiter enforcing the minimum interval between consecutive
/// extract calls. Shared by every concurrent ingest.
pub struct ExtractRateLimiter {
    limiter: DefaultDirectRateLimiter,
}

impl ExtractRateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        let period = min_interval.max(Duration::from_millis(1));
        let quota = Quota::with_period(period).unwrap_or_else(|| {
            Quota::per_second(NonZeroU32::new(1).expect("nonzero"))
        });
        Self {
            limiter: RateLimiter::direct(quota),
        }
    }

    /// Wait until the next extract call is allowed. The first caller passes
    /// immediately; later callers observe the configured floor.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

impl std::fmt::Debug for ExtractRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractRateLimiter").finish()
    }
}

// =============================================================================
// REST client
// =============================================================================

/// Client for a Gemini-style generateContent REST API.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiClient {
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/v1beta/models/{}:{action}",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }

    fn request_body(prompt: &str, temperature: f64) -> Value {
        json!({
            "contents": [
                { "parts": [ { "text": prompt } ] }
            ],
            "generationConfig": { "temperature": temperature }
        })
    }
}

/// Pull the concatenated candidate text out of a generateContent payload.
fn candidate_text(payload: &Value) -> Option<String> {
    let parts = payload.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    if text.is_empty() { None } else { Some(text) }
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let response = self
            .http
            .post(self.endpoint("generateContent"))
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(prompt, 0.1))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                details: details.chars().take(200).collect(),
            });
        }

        let payload: Value = response.json().await?;
        candidate_text(&payload)
            .ok_or_else(|| ModelError::Malformed("response carried no candidate text".to_string()))
    }

    async fn stream_answer(&self, prompt: &str) -> Result<AnswerStream, ModelError> {
        let response = self
            .http
            .post(format!("{}?alt=sse", self.endpoint("streamGenerateContent")))
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(prompt, 0.2))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(ModelError::Api {
                status: status.as_u16(),
                details: details.chars().take(200).collect(),
            });
        }

        let byte_stream = response.bytes_stream();

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend_from_slice(&chunk);

                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    for line in text.lines() {
                        let line = line.trim();
                        if !line.starts_with("data:") {
                            continue;
                        }
                        let data = line.trim_start_matches("data:").trim();
                        if data.is_empty() || data == "[DONE]" {
                            continue;
                        }

                        let payload: Value = serde_json::from_str(data)
                            .map_err(|e| ModelError::Malformed(e.to_string()))?;
                        if let Some(fragment) = candidate_text(&payload) {
                            yield fragment;
                        }
                    }
                }
            }
        };

        Ok(Box::pin(out))
    }
}
