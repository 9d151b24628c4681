//! Completion seam. The pipeline only ever sees `complete(prompt) -> text`;
//! provider wire formats stay in this module.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

use askerp_core::config::{LlmConfig, LlmProvider};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm client configuration error: {0}")]
    Configuration(String),
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm request timed out")]
    Timeout,
    #[error("llm provider returned status {status}")]
    Status { status: u16, body: String },
    #[error("llm response could not be interpreted: {0}")]
    InvalidResponse(String),
    #[error("llm unavailable: {0}")]
    Unavailable(String),
}

impl LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Configuration(_) | Self::InvalidResponse(_) | Self::Unavailable(_) => false,
        }
    }
}

/// How many provider requests one completion may cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Exactly one request; any failure propagates.
    SingleAttempt,
    /// Retryable failures are re-sent up to `llm.max_retries` times.
    Configured,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete_with(&self, prompt: &str, retry: RetryPolicy) -> Result<String, LlmError>;

    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        self.complete_with(prompt, RetryPolicy::Configured).await
    }
}

/// One outbound provider request, kept separate from sending so the wire
/// shape can be checked without a network.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

pub struct HttpLlmClient {
    http: reqwest::Client,
    provider: LlmProvider,
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    max_retries: u32,
}

impl HttpLlmClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|error| LlmError::Configuration(error.to_string()))?;

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(config.provider).to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            provider: config.provider,
            api_key: config.api_key.clone(),
            base_url,
            model: config.model.clone(),
            max_retries: config.max_retries,
        })
    }

    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    /// Extra requests allowed after the first one fails.
    pub fn retry_budget(&self, retry: RetryPolicy) -> u32 {
        match retry {
            RetryPolicy::SingleAttempt => 0,
            RetryPolicy::Configured => self.max_retries,
        }
    }

    pub fn build_request(&self, prompt: &str) -> ProviderRequest {
        let api_key =
            self.api_key.as_ref().map(|key| key.expose_secret().to_string()).unwrap_or_default();

        match self.provider {
            LlmProvider::OpenAi => ProviderRequest {
                url: format!("{}/chat/completions", self.base_url),
                headers: vec![("Authorization", format!("Bearer {api_key}"))],
                body: json!({
                    "model": self.model,
                    "temperature": 0,
                    "messages": [{ "role": "user", "content": prompt }],
                }),
            },
            LlmProvider::Anthropic => ProviderRequest {
                url: format!("{}/v1/messages", self.base_url),
                headers: vec![
                    ("x-api-key", api_key),
                    ("anthropic-version", "2023-06-01".to_string()),
                ],
                body: json!({
                    "model": self.model,
                    "max_tokens": 1024,
                    "temperature": 0,
                    "messages": [{ "role": "user", "content": prompt }],
                }),
            },
            LlmProvider::Ollama => ProviderRequest {
                url: format!("{}/api/generate", self.base_url),
                headers: Vec::new(),
                body: json!({
                    "model": self.model,
                    "prompt": prompt,
                    "stream": false,
                    "options": { "temperature": 0 },
                }),
            },
            LlmProvider::Gemini => ProviderRequest {
                url: format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model),
                headers: vec![("x-goog-api-key", api_key)],
                body: json!({
                    "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
                    "generationConfig": { "temperature": 0 },
                }),
            },
        }
    }

    async fn send_once(&self, request: &ProviderRequest) -> Result<String, LlmError> {
        let mut builder = self.http.post(&request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let response = builder.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body });
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|error| LlmError::InvalidResponse(error.to_string()))?;

        extract_completion(self.provider, &payload)
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn complete_with(&self, prompt: &str, retry: RetryPolicy) -> Result<String, LlmError> {
        let request = &self.build_request(prompt);
        send_with_retries(self.provider, self.retry_budget(retry), || self.send_once(request)).await
    }
}

/// Runs `send` once, then again for each retryable failure while the budget
/// lasts, backing off linearly between attempts.
async fn send_with_retries<F, Fut>(
    provider: LlmProvider,
    max_retries: u32,
    mut send: F,
) -> Result<String, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, LlmError>>,
{
    let mut attempt = 0;

    loop {
        match send().await {
            Ok(text) => return Ok(text),
            Err(error) if error.is_retryable() && attempt < max_retries => {
                attempt += 1;
                warn!(
                    event_name = "llm.request.retry",
                    provider = ?provider,
                    attempt,
                    error = %error,
                    "retrying completion request"
                );
                tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
            }
            Err(error) => return Err(error),
        }
    }
}

pub fn default_base_url(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::OpenAi => "https://api.openai.com/v1",
        LlmProvider::Anthropic => "https://api.anthropic.com",
        LlmProvider::Ollama => "http://localhost:11434",
        LlmProvider::Gemini => "https://generativelanguage.googleapis.com",
    }
}

/// Pulls the completion text out of a provider response body.
pub fn extract_completion(provider: LlmProvider, payload: &Value) -> Result<String, LlmError> {
    if let Some(error) = payload.get("error") {
        return Err(LlmError::InvalidResponse(format!("provider error: {error}")));
    }

    let text = match provider {
        LlmProvider::OpenAi => {
            payload["choices"][0]["message"]["content"].as_str().map(str::to_string)
        }
        LlmProvider::Anthropic => join_text_parts(&payload["content"]),
        LlmProvider::Ollama => payload["response"].as_str().map(str::to_string),
        LlmProvider::Gemini => join_text_parts(&payload["candidates"][0]["content"]["parts"]),
    };

    match text {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(LlmError::InvalidResponse("no completion text in response".to_string())),
    }
}

fn join_text_parts(parts: &Value) -> Option<String> {
    let parts = parts.as_array()?;
    let text = parts.iter().filter_map(|part| part["text"].as_str()).collect::<Vec<_>>().join("");
    Some(text)
}

/// Replays queued completions in order and records every prompt with the
/// retry policy it was sent under. Used by tests across the workspace in place
/// of a live provider.
#[derive(Default)]
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<(String, RetryPolicy)>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(responses.into_iter().map(|text| Ok(text.into())))
    }

    pub fn with_results<I>(results: I) -> Self
    where
        I: IntoIterator<Item = Result<String, LlmError>>,
    {
        Self { responses: Mutex::new(results.into_iter().collect()), calls: Mutex::default() }
    }

    pub async fn prompts(&self) -> Vec<String> {
        self.calls.lock().await.iter().map(|(prompt, _)| prompt.clone()).collect()
    }

    pub async fn retry_policies(&self) -> Vec<RetryPolicy> {
        self.calls.lock().await.iter().map(|(_, retry)| *retry).collect()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete_with(&self, prompt: &str, retry: RetryPolicy) -> Result<String, LlmError> {
        self.calls.lock().await.push((prompt.to_string(), retry));
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Unavailable("no scripted completion left".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;

    use askerp_core::config::{LlmConfig, LlmProvider};

    use std::sync::atomic::{AtomicU32, Ordering};

    use super::{
        extract_completion, send_with_retries, HttpLlmClient, LlmClient, LlmError, RetryPolicy,
        ScriptedLlmClient,
    };

    fn config(provider: LlmProvider, base_url: Option<&str>) -> LlmConfig {
        LlmConfig {
            provider,
            api_key: Some(SecretString::from("test-key".to_string())),
            base_url: base_url.map(str::to_string),
            model: "gemini-2.5-flash".to_string(),
            timeout_secs: 5,
            max_retries: 0,
        }
    }

    #[test]
    fn gemini_request_targets_generate_content() {
        let client = HttpLlmClient::from_config(&config(LlmProvider::Gemini, None)).expect("client");
        let request = client.build_request("quantos pedidos?");

        assert_eq!(
            request.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(request.headers, vec![("x-goog-api-key", "test-key".to_string())]);
        assert_eq!(request.body["contents"][0]["parts"][0]["text"], "quantos pedidos?");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client =
            HttpLlmClient::from_config(&config(LlmProvider::Ollama, Some("http://llm:11434/")))
                .expect("client");
        let request = client.build_request("hi");

        assert_eq!(request.url, "http://llm:11434/api/generate");
        assert!(request.headers.is_empty());
        assert_eq!(request.body["stream"], false);
    }

    #[test]
    fn openai_request_uses_bearer_auth() {
        let client = HttpLlmClient::from_config(&config(LlmProvider::OpenAi, None)).expect("client");
        let request = client.build_request("hi");

        assert_eq!(request.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(request.headers, vec![("Authorization", "Bearer test-key".to_string())]);
    }

    #[test]
    fn extracts_text_for_each_provider() {
        let openai = json!({ "choices": [{ "message": { "content": "sql" } }] });
        let anthropic = json!({ "content": [{ "type": "text", "text": "con" }, { "type": "text", "text": "versa" }] });
        let ollama = json!({ "response": "sql" });
        let gemini = json!({ "candidates": [{ "content": { "parts": [{ "text": "```sql\nSELECT 1\n```" }] } }] });

        assert_eq!(extract_completion(LlmProvider::OpenAi, &openai).expect("openai"), "sql");
        assert_eq!(
            extract_completion(LlmProvider::Anthropic, &anthropic).expect("anthropic"),
            "conversa"
        );
        assert_eq!(extract_completion(LlmProvider::Ollama, &ollama).expect("ollama"), "sql");
        assert!(extract_completion(LlmProvider::Gemini, &gemini).expect("gemini").contains("SELECT 1"));
    }

    #[test]
    fn empty_or_error_payloads_are_invalid() {
        let empty = json!({ "choices": [] });
        let error = json!({ "error": { "message": "quota exceeded" } });

        assert!(matches!(
            extract_completion(LlmProvider::OpenAi, &empty),
            Err(LlmError::InvalidResponse(_))
        ));
        assert!(matches!(
            extract_completion(LlmProvider::Gemini, &error),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn scripted_client_replays_and_records() {
        let client = ScriptedLlmClient::new(["sql"]);

        assert_eq!(client.complete("first").await.expect("scripted"), "sql");
        assert!(matches!(
            client.complete_with("second", RetryPolicy::SingleAttempt).await,
            Err(LlmError::Unavailable(_))
        ));
        assert_eq!(client.prompts().await, vec!["first", "second"]);
        assert_eq!(
            client.retry_policies().await,
            vec![RetryPolicy::Configured, RetryPolicy::SingleAttempt]
        );
    }

    #[test]
    fn single_attempt_policy_ignores_configured_retries() {
        let mut config = config(LlmProvider::Ollama, None);
        config.max_retries = 2;
        let client = HttpLlmClient::from_config(&config).expect("client");

        assert_eq!(client.retry_budget(RetryPolicy::SingleAttempt), 0);
        assert_eq!(client.retry_budget(RetryPolicy::Configured), 2);
    }

    #[tokio::test]
    async fn timeouts_are_sent_once_without_retry_budget() {
        let attempts = AtomicU32::new(0);

        let result = send_with_retries(LlmProvider::Ollama, 0, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Timeout) }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Timeout)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_failures_use_the_whole_budget() {
        let attempts = AtomicU32::new(0);

        let result = send_with_retries(LlmProvider::Ollama, 2, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(LlmError::Status { status: 503, body: String::new() })
                } else {
                    Ok("sql".to_string())
                }
            }
        })
        .await;

        assert_eq!(result.expect("third attempt succeeds"), "sql");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_failures_are_not_resent() {
        let attempts = AtomicU32::new(0);

        let result = send_with_retries(LlmProvider::Gemini, 2, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::Status { status: 401, body: "bad key".to_string() }) }
        })
        .await;

        assert!(matches!(result, Err(LlmError::Status { status: 401, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
