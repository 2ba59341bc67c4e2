//! OpenAI-compatible chat/completions translation backend.
//! Pooled reqwest client, a one-slot rate limiter and the retry policy below.
//! One batch is one user message: an instruction header plus one text per line.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::TranslationBackend;
use crate::config::BackendConfig;
use crate::error::{BackendError, ConfigError};

/// Chat/completions client for one model.
pub struct ChatCompletionsBackend {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    request_timeout: Duration,
    max_rate_limit_retries: u32,
    max_server_retries: u32,
    /// Simple token-bucket: tracks the next allowed request time.
    next_allowed: Arc<tokio::sync::Mutex<Instant>>,
    min_interval: Duration,
}

impl ChatCompletionsBackend {
    /// Build from config, reading the API key from the configured env var.
    pub fn from_config(config: &BackendConfig) -> Result<Self, ConfigError> {
        let api_key = config.api_key()?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &BackendConfig, api_key: impl Into<String>) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(config.timeout())
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "backend",
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            request_timeout: config.timeout(),
            max_rate_limit_retries: config.max_rate_limit_retries,
            max_server_retries: config.max_server_retries,
            next_allowed: Arc::new(tokio::sync::Mutex::new(Instant::now())),
            min_interval: Duration::from_millis(config.min_interval_ms),
        })
    }

    /// Wait until the rate limiter allows a request.
    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    /// Send request with retry logic.
    /// 429: Retry-After or 1s/2s/4s (max `max_rate_limit_retries`).
    /// 5xx: exponential backoff (max `max_server_retries`).
    /// Timeout: immediate retry once.
    async fn send_with_retry(&self, body: &serde_json::Value) -> Result<reqwest::Response, BackendError> {
        let mut attempt: u32 = 0;
        let mut timeout_retried = false;

        loop {
            self.rate_limit_wait().await;

            let result = self
                .http
                .post(format!("{}/v1/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 => {
                    let wait = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| Duration::from_secs(1 << attempt.min(6)));
                    if attempt >= self.max_rate_limit_retries {
                        return Err(BackendError::RateLimited {
                            retry_after_ms: wait.as_millis() as u64,
                        });
                    }
                    warn!(attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) if resp.status().as_u16() == 401 || resp.status().as_u16() == 403 => {
                    let status = resp.status();
                    return Err(BackendError::Auth(format!("status {status}")));
                }
                Ok(resp) if resp.status().is_server_error() => {
                    if attempt >= self.max_server_retries {
                        let status = resp.status().as_u16();
                        let body = truncated_body(resp).await;
                        return Err(BackendError::Http { status, body });
                    }
                    let wait = Duration::from_millis(500 * (1 << attempt.min(6)));
                    warn!(
                        attempt,
                        status = resp.status().as_u16(),
                        wait_ms = wait.as_millis() as u64,
                        "5xx error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = truncated_body(resp).await;
                    return Err(BackendError::Http { status, body });
                }
                Err(e) if e.is_timeout() => {
                    if timeout_retried {
                        return Err(BackendError::Timeout {
                            after_ms: self.request_timeout.as_millis() as u64,
                        });
                    }
                    warn!("request timeout, retrying once");
                    timeout_retried = true;
                }
                Err(e) => return Err(BackendError::Transport(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl TranslationBackend for ChatCompletionsBackend {
    async fn translate_batch(
        &self,
        texts: &[String],
        target_language: &str,
    ) -> Result<Vec<String>, BackendError> {
        if texts.is_empty() {
            return Err(BackendError::EmptyInput);
        }

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": build_user_prompt(texts, target_language)}
            ],
            "max_tokens": estimate_max_tokens(texts, self.max_tokens),
            "temperature": self.temperature,
            "stream": false
        });

        let start = Instant::now();
        let response = self.send_with_retry(&body).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::InvalidResponse("no choices in response".into()))?;

        let lines = split_response_lines(&content, texts);
        debug!(
            requested = texts.len(),
            received = lines.len(),
            tokens = parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "chat batch translated"
        );
        Ok(lines)
    }

    fn name(&self) -> &str {
        "chat-completions"
    }
}

// --- Prompt construction ---

const SYSTEM_PROMPT: &str = "You are a translator for software localization files. \
Output only the translations, one per line, nothing else.";

/// Instruction header, then one text per line.
fn build_user_prompt(texts: &[String], target_language: &str) -> String {
    format!(
        "Translate each of the following {} lines to {}. Keep placeholders such as {{0}} or %s unchanged. \
Reply with exactly one line per input line, in the same order.\n{}",
        texts.len(),
        target_language,
        texts.join("\n")
    )
}

/// Estimate max_tokens: (input_tokens * 1.15 + 32), capped at `cap`.
fn estimate_max_tokens(texts: &[String], cap: u32) -> u32 {
    // Rough: ~3 bytes per token across Latin and CJK text.
    let bytes: usize = texts.iter().map(|t| t.len() + 1).sum();
    let estimated_input_tokens = bytes as f64 / 3.0;
    let max = (estimated_input_tokens * 1.15 + 32.0) as u32;
    max.clamp(64.min(cap), cap)
}

fn bullet_pattern() -> &'static Regex {
    static BULLET: OnceLock<Regex> = OnceLock::new();
    BULLET.get_or_init(|| Regex::new(r"^\s*([-*•])\s+").expect("bullet pattern is valid"))
}

fn bullet_marker(line: &str) -> Option<&str> {
    bullet_pattern()
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// One translation per non-blank line. A list bullet is stripped only when
/// the model wrapped the whole reply in one: every line carries the same
/// marker and no source text starts with a bullet of its own.
fn split_response_lines(content: &str, sources: &[String]) -> Vec<String> {
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();

    let marker = lines.first().and_then(|l| bullet_marker(l));
    let strip = marker.is_some()
        && lines.iter().all(|l| bullet_marker(l) == marker)
        && sources.iter().all(|s| bullet_marker(s).is_none());

    lines
        .into_iter()
        .map(|line| {
            if strip {
                bullet_pattern().replace(line, "").trim_end().to_string()
            } else {
                line.trim_end().to_string()
            }
        })
        .filter(|line| !line.trim().is_empty())
        .collect()
}

async fn truncated_body(resp: reqwest::Response) -> String {
    resp.text()
        .await
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect()
}

// --- Response types ---

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: u32,
}
