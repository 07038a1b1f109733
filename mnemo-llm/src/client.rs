//! LLM Client — unified interface for Ollama and OpenAI-compatible backends.

use std::time::{Duration, Instant};

use mnemo_core::config::LlmConfig;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::types::{LlmRequest, LlmResponse};

/// Provider backend for LLM inference.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Ollama running locally.
    Ollama {
        /// Server root, e.g. `http://localhost:11434`.
        base_url: String,
    },
    /// OpenAI-compatible chat completions API.
    OpenAiCompatible {
        /// API root without the `/v1` suffix.
        base_url: String,
        /// Bearer token.
        api_key: String,
    },
    /// No LLM available; every call fails and the judge fails open.
    None,
}

/// Routes requests to the configured backend with bounded retries.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    model: String,
    max_retries: u32,
    request_timeout_ms: u64,
}

impl LlmClient {
    /// Create a new LLM client.
    #[must_use]
    pub fn new(provider: LlmProvider, model: impl Into<String>, max_retries: u32) -> Self {
        Self {
            provider,
            http: Client::new(),
            model: model.into(),
            max_retries,
            request_timeout_ms: 5000,
        }
    }

    /// Create a client with no LLM backend.
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, String::new(), 0)
    }

    /// Cap every request at `timeout_ms`, whatever the request asks for.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout_ms: u64) -> Self {
        self.request_timeout_ms = timeout_ms;
        self
    }

    /// Build a client from the `[llm]` config section.
    ///
    /// # Errors
    /// Returns `LlmError::ConfigError` for an unknown provider, or when the
    /// OpenAI provider is selected and `api_key_env` is not set.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let provider = match config.provider.as_str() {
            "none" => return Ok(Self::none()),
            "ollama" => LlmProvider::Ollama { base_url },
            "openai" => {
                let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                    LlmError::ConfigError(format!("environment variable {} is not set", config.api_key_env))
                })?;
                LlmProvider::OpenAiCompatible { base_url, api_key }
            }
            other => return Err(LlmError::ConfigError(format!("unknown provider '{other}'"))),
        };
        Ok(Self::new(provider, &config.model, config.max_retries)
            .with_request_timeout(config.request_timeout_ms))
    }

    /// Generate a response from the LLM.
    ///
    /// # Errors
    /// `Unavailable` without a backend, `Timeout` if the last attempt timed
    /// out, `RetriesExhausted` after repeated server errors, `RequestFailed`
    /// on a non-retryable client error, `ParseError` on a malformed envelope.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let timeout_ms = request.timeout_ms.min(self.request_timeout_ms);
        match &self.provider {
            LlmProvider::None => Err(LlmError::Unavailable("No LLM provider configured".into())),
            LlmProvider::Ollama { base_url } => {
                let url = format!("{base_url}/api/generate");
                let (body, latency_ms) = self
                    .post_with_retries(&url, None, &self.ollama_body(request), timeout_ms)
                    .await?;
                let text = body["response"]
                    .as_str()
                    .ok_or_else(|| LlmError::ParseError("Ollama response has no 'response' field".into()))?;
                Ok(LlmResponse {
                    text: text.to_string(),
                    tokens_generated: token_count(&body["eval_count"]),
                    latency_ms,
                    model: self.model.clone(),
                })
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                let url = format!("{base_url}/v1/chat/completions");
                let (body, latency_ms) = self
                    .post_with_retries(&url, Some(api_key), &self.openai_body(request), timeout_ms)
                    .await?;
                let text = body["choices"][0]["message"]["content"]
                    .as_str()
                    .ok_or_else(|| LlmError::ParseError("completion has no message content".into()))?;
                Ok(LlmResponse {
                    text: text.to_string(),
                    tokens_generated: token_count(&body["usage"]["completion_tokens"]),
                    latency_ms,
                    model: self.model.clone(),
                })
            }
        }
    }

    fn ollama_body(&self, request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "system": request.system,
            "prompt": request.user,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            }
        });
        if request.json_mode {
            body["format"] = json!("json");
        }
        body
    }

    fn openai_body(&self, request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": request.system },
                { "role": "user", "content": request.user },
            ],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    /// POST `body` to `url`, retrying transport failures, 429 and 5xx.
    async fn post_with_retries(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &Value,
        timeout_ms: u64,
    ) -> Result<(Value, u64), LlmError> {
        let attempts = self.max_retries + 1;
        let mut last_error = LlmError::Unavailable("no attempt made".into());

        for attempt in 1..=attempts {
            if attempt > 1 {
                debug!(attempt, attempts, error = %last_error, "retrying LLM call");
            }

            let start = Instant::now();
            let mut builder = self
                .http
                .post(url)
                .json(body)
                .timeout(Duration::from_millis(timeout_ms));
            if let Some(key) = bearer {
                builder = builder.bearer_auth(key);
            }

            match builder.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let json: Value = resp.json().await.map_err(|e| LlmError::ParseError(e.to_string()))?;
                    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                    debug!(latency_ms, attempt, "LLM call succeeded");
                    return Ok((json, latency_ms));
                }
                Ok(resp) => {
                    let status = resp.status();
                    let detail = resp.text().await.unwrap_or_default();
                    warn!(%status, attempt, attempts, "LLM provider returned an error status");
                    let err = LlmError::RequestFailed(format!("HTTP {status}: {detail}"));
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        return Err(err);
                    }
                    last_error = err;
                }
                Err(e) => {
                    warn!(error = %e, attempt, attempts, timeout_ms, "LLM request failed");
                    last_error = if e.is_timeout() {
                        LlmError::Timeout(timeout_ms)
                    } else {
                        LlmError::from(e)
                    };
                }
            }
        }

        match last_error {
            LlmError::Timeout(ms) => Err(LlmError::Timeout(ms)),
            other => Err(LlmError::RetriesExhausted {
                attempts,
                last_error: other.to_string(),
            }),
        }
    }

    /// Parse a raw LLM response text as structured JSON.
    ///
    /// # Errors
    /// Returns `LlmError::ParseError` if the text does not match `T`.
    pub fn parse_structured<T: serde::de::DeserializeOwned>(
        &self,
        response: &LlmResponse,
    ) -> Result<T, LlmError> {
        serde_json::from_str(&response.text)
            .map_err(|e| LlmError::ParseError(format!("JSON parse error: {e} (raw text: '{}')", response.text)))
    }

    /// Check if the LLM client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }

    /// Model name sent with every request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Effective per-request timeout cap.
    #[must_use]
    pub fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_ms
    }
}

fn token_count(value: &Value) -> u32 {
    value.as_u64().and_then(|n| u32::try_from(n).ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RerankResponse;

    fn config(provider: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.into(),
            ..LlmConfig::default()
        }
    }

    #[tokio::test]
    async fn none_provider_is_unavailable() {
        let client = LlmClient::from_config(&config("none")).expect("none is valid");
        assert!(!client.is_available());
        let err = client
            .generate(&LlmRequest::structured("sys", "user"))
            .await
            .expect_err("no backend");
        assert!(matches!(err, LlmError::Unavailable(_)));
    }

    #[test]
    fn openai_requires_api_key() {
        let mut cfg = config("openai");
        cfg.api_key_env = "MNEMO_TEST_KEY_THAT_IS_NEVER_SET".into();
        let err = LlmClient::from_config(&cfg).err().expect("missing key");
        assert!(err.to_string().contains("MNEMO_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn ollama_from_config() {
        let mut cfg = config("ollama");
        cfg.base_url = "http://localhost:11434/".into();
        cfg.request_timeout_ms = 750;
        let client = LlmClient::from_config(&cfg).expect("ollama");
        assert!(client.is_available());
        assert_eq!(client.model(), "qwen2.5:1.5b");
        assert_eq!(client.request_timeout_ms(), 750);
        assert!(matches!(&client.provider, LlmProvider::Ollama { base_url } if base_url == "http://localhost:11434"));
    }

    #[test]
    fn json_mode_bodies() {
        let client = LlmClient::new(LlmProvider::None, "m", 0);
        let request = LlmRequest::structured("sys", "user").with_max_tokens(64);

        let ollama = client.ollama_body(&request);
        assert_eq!(ollama["format"], "json");
        assert_eq!(ollama["system"], "sys");
        assert_eq!(ollama["options"]["num_predict"], 64);

        let openai = client.openai_body(&request);
        assert_eq!(openai["response_format"]["type"], "json_object");
        assert_eq!(openai["messages"][1]["content"], "user");

        let mut free = request;
        free.json_mode = false;
        assert!(client.ollama_body(&free).get("format").is_none());
    }

    #[test]
    fn parses_structured_ranking() {
        let client = LlmClient::none();
        let response = LlmResponse {
            text: r#"{"ranking": ["m2", "m1"]}"#.into(),
            tokens_generated: 9,
            latency_ms: 12,
            model: "m".into(),
        };
        let parsed: RerankResponse = client.parse_structured(&response).expect("valid ranking");
        assert_eq!(parsed.ranking, vec!["m2", "m1"]);
    }
}
