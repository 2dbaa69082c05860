//! LLM client: the single point of entry for all Claude API calls.
//!
//! No other module calls the Anthropic API directly. Pipeline stages and the
//! DM flow depend on the `LlmProvider` trait, never on `LlmClient`.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for all LLM calls.
pub const MODEL: &str = "claude-sonnet-4-5";
/// Upper bound on any single completion.
const MAX_OUTPUT_TOKENS: u32 = 4096;
const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,
}

/// Text-completion capability used by Discovery, Generation and DM targeting.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        system: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [UserTurn<'a>; 1],
}

#[derive(Debug, Serialize)]
struct UserTurn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

#[derive(Debug, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl LlmResponse {
    /// Text of the first `text` block.
    pub fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .filter(|b| b.kind == "text")
            .find_map(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Pulls the human-readable message out of an error body, or keeps the body.
fn api_error_message(body: String) -> String {
    serde_json::from_str::<ApiErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body)
}

/// Rate limits and server errors are worth another attempt; other failures are not.
fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Wait before retry number `attempt` (1-based): 1s, 2s, 4s, ...
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.saturating_sub(1).min(6))
}

/// How one HTTP attempt ended.
enum Attempt {
    Done(LlmResponse),
    Retry(LlmError),
    Fail(LlmError),
}

/// Anthropic Messages API client with retry on rate limits and server errors.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
        }
    }

    /// One request to the Messages API, returning the full response object.
    pub async fn call(
        &self,
        prompt: &str,
        system: &str,
        max_tokens: u32,
    ) -> Result<LlmResponse, LlmError> {
        let body = MessagesRequest {
            model: MODEL,
            max_tokens: max_tokens.min(MAX_OUTPUT_TOKENS),
            system,
            messages: [UserTurn {
                role: "user",
                content: prompt,
            }],
        };

        let mut last_error = None;
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = backoff(attempt);
                warn!("LLM attempt {attempt} failed, retrying in {}ms", delay.as_millis());
                tokio::time::sleep(delay).await;
            }

            match self.attempt(&body).await {
                Attempt::Done(response) => {
                    debug!(
                        "LLM call used {} input / {} output tokens",
                        response.usage.input_tokens, response.usage.output_tokens
                    );
                    return Ok(response);
                }
                Attempt::Retry(e) => last_error = Some(e),
                Attempt::Fail(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }

    async fn attempt(&self, body: &MessagesRequest<'_>) -> Attempt {
        let response = match self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return Attempt::Retry(LlmError::Http(e)),
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<LlmResponse>().await {
                Ok(parsed) => Attempt::Done(parsed),
                Err(e) => Attempt::Fail(LlmError::Http(e)),
            };
        }

        let text = response.text().await.unwrap_or_default();
        let error = LlmError::Api {
            status: status.as_u16(),
            message: api_error_message(text),
        };
        if is_retryable(status) {
            warn!("LLM API returned {status}: {error}");
            Attempt::Retry(error)
        } else {
            Attempt::Fail(error)
        }
    }
}

#[async_trait]
impl LlmProvider for LlmClient {
    async fn complete(
        &self,
        prompt: &str,
        system: &str,
        max_tokens: u32,
    ) -> Result<String, LlmError> {
        let response = self.call(prompt, system, max_tokens).await?;
        response
            .text()
            .map(str::to_string)
            .ok_or(LlmError::EmptyContent)
    }
}

/// Completes and deserializes the reply as JSON. The prompt must ask for JSON.
pub async fn call_json<T: DeserializeOwned>(
    llm: &dyn LlmProvider,
    prompt: &str,
    system: &str,
    max_tokens: u32,
) -> Result<T, LlmError> {
    let text = llm.complete(prompt, system, max_tokens).await?;
    parse_json(&text)
}

/// Parses LLM text as JSON once any markdown code fence is removed.
pub fn parse_json<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    match strip_json_fences(text) {
        "" => Err(LlmError::EmptyContent),
        json => Ok(serde_json::from_str(json)?),
    }
}

/// Removes a surrounding ```` ``` ```` or ```` ```json ```` fence, if present.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays scripted responses in order; `Err` entries become API errors.
    /// When the script runs dry every call fails.
    #[derive(Default)]
    pub struct ScriptedLlm {
        script: Mutex<VecDeque<Result<String, String>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        pub fn new<I, S>(responses: I) -> Self
        where
            I: IntoIterator<Item = Result<S, S>>,
            S: Into<String>,
        {
            Self {
                script: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(Into::into).map_err(Into::into))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        async fn complete(
            &self,
            prompt: &str,
            _system: &str,
            _max_tokens: u32,
        ) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.script.lock().unwrap().pop_front() {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => Err(LlmError::Api {
                    status: 500,
                    message,
                }),
                None => Err(LlmError::EmptyContent),
            }
        }
    }
}
