//! `LlmJudge` — the production [`RelevanceJudge`] backed by [`LlmClient`].
//!
//! The judge only transports text. Parsing and validation of the returned
//! ranking happen in `mnemo_core::judge`, which fails open on anything it
//! cannot use.

use async_trait::async_trait;
use mnemo_core::config::LlmConfig;
use mnemo_core::judge::{JudgeError, JudgeRequest, RelevanceJudge};
use tracing::debug;

use crate::client::LlmClient;
use crate::error::LlmError;
use crate::prompt::{PROMPT_VERSION, render_judge_prompt};
use crate::types::LlmRequest;

const TOKENS_PER_CANDIDATE: u32 = 12;
const BASE_TOKENS: u32 = 32;

/// Relevance judge that asks an LLM for a JSON ranking.
pub struct LlmJudge {
    client: LlmClient,
}

impl LlmJudge {
    /// Wrap an existing client.
    #[must_use]
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }

    /// Build the client from the `[llm]` section.
    ///
    /// # Errors
    /// Propagates [`LlmClient::from_config`] errors.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        LlmClient::from_config(config).map(Self::new)
    }

    /// Underlying client.
    #[must_use]
    pub fn client(&self) -> &LlmClient {
        &self.client
    }

    /// The LLM request sent for `request`.
    #[must_use]
    pub fn build_request(&self, request: &JudgeRequest) -> LlmRequest {
        let (system, user) = render_judge_prompt(request);
        let candidates = u32::try_from(request.candidates.len()).unwrap_or(u32::MAX);
        LlmRequest::structured(system, user)
            .with_max_tokens(BASE_TOKENS.saturating_add(candidates.saturating_mul(TOKENS_PER_CANDIDATE)))
            .with_timeout(self.client.request_timeout_ms())
    }
}

#[async_trait]
impl RelevanceJudge for LlmJudge {
    async fn judge(&self, request: &JudgeRequest) -> Result<String, JudgeError> {
        if !self.client.is_available() {
            return Err(JudgeError::Unavailable("No LLM provider configured".into()));
        }
        let llm_request = self.build_request(request);
        let response = self.client.generate(&llm_request).await?;
        debug!(
            model = %response.model,
            prompt = PROMPT_VERSION,
            candidates = request.candidates.len(),
            latency_ms = response.latency_ms,
            tokens = response.tokens_generated,
            "Judge response received"
        );
        Ok(response.text)
    }
}
