//! # mnemo-llm — LLM relevance judge for MNEMO
//!
//! Provides the production [`mnemo_core::judge::RelevanceJudge`] over two
//! HTTP backends:
//!   - **Ollama** (`/api/generate`, local, recommended default)
//!   - **OpenAI-compatible API** (`/v1/chat/completions`)
//!
//! Every call here enforces:
//!   - JSON-mode structured output
//!   - a per-request timeout
//!   - bounded retries, logged with `tracing`
//!
//! Failures surface as [`mnemo_core::judge::JudgeError`]; the core adapter
//! then keeps the fused order, so a dead LLM never fails a search.

pub mod client;
pub mod error;
pub mod judge;
pub mod prompt;
pub mod types;

pub use client::{LlmClient, LlmProvider};
pub use error::LlmError;
pub use judge::LlmJudge;
pub use types::{LlmRequest, LlmResponse, RerankResponse};
