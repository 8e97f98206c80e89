//! OpenAI-compatible chat client implementing [`RelevanceOracle`].

use std::time::Duration;

use async_trait::async_trait;
use pipeline::{
    jitter_sample, BackoffPolicy, JudgeRequest, OracleError, RelevanceOracle, RetryPolicy,
    SearchTerms, Verdict,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::parse::{parse_terms, parse_verdict};
use crate::prompts;

/// Errors raised while constructing the oracle.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("LLM API key is empty")]
    MissingApiKey,
}

/// Provider settings for [`ChatOracle`].
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    /// Base URL up to and including the API version, e.g.
    /// `https://api.openai.com/v1`.
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub temperature: f32,
    pub timeout: Duration,
    /// Retries for 429, 5xx and network failures.
    pub retry: BackoffPolicy,
}

impl LlmConfig {
    /// Default provider settings with the given key.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: api_key.into(),
            temperature: 0.1,
            timeout: Duration::from_secs(60),
            retry: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Relevance oracle backed by a chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatOracle {
    http: reqwest::Client,
    config: LlmConfig,
    cancel: CancellationToken,
}

impl ChatOracle {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Retry back-off ends early once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// One system + user completion, retried per the configured policy.
    async fn complete(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
        };

        let retry = self.config.retry;
        let mut failures = 0u32;
        loop {
            let Failure { error, after } = match self.send(&url, &body).await {
                Ok(content) => return Ok(content),
                Err(failure) => failure,
            };
            let hinted = match error.retry_policy() {
                RetryPolicy::NonRetryable => return Err(error),
                RetryPolicy::Retryable { after: policy } => after.or(policy),
            };

            failures += 1;
            if !retry.allows_retry(failures) {
                return Err(OracleError::Unavailable {
                    message: format!("{error} (after {failures} attempts)"),
                });
            }
            let delay = match hinted {
                Some(after) => retry.cap(after),
                None => retry.delay_for(failures, jitter_sample()),
            };
            warn!(attempt = failures, delay_ms = delay.as_millis() as u64, %error, "LLM call failed; retrying");
            self.pause(delay).await?;
        }
    }

    /// Sleeps unless cancellation fires first.
    async fn pause(&self, duration: Duration) -> Result<(), OracleError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancel.cancelled() => Err(OracleError::Unavailable {
                message: "cancelled while waiting to retry".to_string(),
            }),
        }
    }

    async fn send(&self, url: &str, body: &ChatRequest<'_>) -> Result<String, Failure> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Failure::plain(OracleError::Unavailable {
                message: e.to_string(),
            }))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            let after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let text = response.text().await.unwrap_or_default();
            return Err(Failure {
                error: OracleError::Unavailable {
                    message: format!("LLM API returned {status}: {}", preview(&text)),
                },
                after,
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Failure::plain(OracleError::Rejected {
                status: status.as_u16(),
                message: preview(&text),
            }));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            Failure::plain(OracleError::InvalidResponse {
                message: format!("malformed chat response: {e}"),
            })
        })?;
        first_content(parsed).ok_or_else(|| {
            Failure::plain(OracleError::InvalidResponse {
                message: "chat response has no content".to_string(),
            })
        })
    }
}

/// A failed attempt and the provider's `Retry-After`, if any.
struct Failure {
    error: OracleError,
    after: Option<Duration>,
}

impl Failure {
    fn plain(error: OracleError) -> Self {
        Self { error, after: None }
    }
}

#[async_trait]
impl RelevanceOracle for ChatOracle {
    async fn keywords(
        &self,
        topic: &str,
        language: Option<&str>,
    ) -> Result<SearchTerms, OracleError> {
        let content = self
            .complete(prompts::KEYWORDS_SYSTEM, &prompts::keywords_user(topic, language))
            .await?;
        let terms = parse_terms(&content)?;
        info!(keywords = ?terms.keywords, "search keywords generated");
        Ok(terms)
    }

    async fn judge(&self, request: &JudgeRequest<'_>) -> Result<Verdict, OracleError> {
        let system = prompts::judge_system(request.topic, request.judgment);
        let user = prompts::judge_user(request.title, request.message, request.files, request.diff);
        let content = self.complete(&system, &user).await?;
        let verdict = parse_verdict(&content);
        debug!(url = request.url, ?verdict, "judged");
        Ok(verdict)
    }
}

fn first_content(response: ChatResponse) -> Option<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn preview(text: &str) -> String {
    text.chars().take(200).collect()
}
