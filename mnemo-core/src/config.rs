//! Configuration for the MNEMO retrieval pipeline.
//!
//! Maps directly to `mnemo.toml`. Every section is optional and falls back
//! to the production defaults.

use serde::{Deserialize, Serialize};

use crate::error::{MnemoError, Result};
use crate::fusion::FusionMode;
use crate::judge::RerankerConfig;
use crate::optimizer::GaConfig;
use crate::params::SearchParameters;

/// Top-level MNEMO configuration, loadable from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MnemoConfig {
    /// Logging settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Hybrid search pipeline settings.
    #[serde(default)]
    pub search: SearchConfig,
    /// Ranking parameters (what the optimizer tunes).
    #[serde(default)]
    pub parameters: SearchParameters,
    /// External relevance judge.
    #[serde(default)]
    pub reranker: RerankerConfig,
    /// Genetic optimizer.
    #[serde(default)]
    pub optimizer: GaConfig,
    /// LLM connection used by the judge.
    #[serde(default)]
    pub llm: LlmConfig,
}

impl MnemoConfig {
    /// Load configuration from a TOML string and validate it.
    ///
    /// # Errors
    /// Returns `MnemoError::Config` if the TOML is invalid or a value is out of range.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| MnemoError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Serialize back to TOML (e.g. after writing tuned parameters).
    ///
    /// # Errors
    /// Returns `MnemoError::Serialization` if encoding fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| MnemoError::Serialization(e.to_string()))
    }

    /// Cross-field validation. `parameters` is already bounds-checked on load.
    ///
    /// # Errors
    /// Returns `MnemoError::Config` describing the first problem.
    pub fn validate(&self) -> Result<()> {
        self.general.validate()?;
        self.search.validate()?;
        self.optimizer.validate()?;
        self.llm.validate()?;
        if self.reranker.enabled && self.reranker.timeout_ms == 0 {
            return Err(MnemoError::Config("reranker.timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// Single-line output.
    Compact,
    /// Newline-delimited JSON.
    Json,
}

/// General system settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error. `RUST_LOG` overrides it.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<()> {
        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" | "off" => Ok(()),
            other => Err(MnemoError::Config(format!("unknown general.log_level '{other}'"))),
        }
    }
}

/// Hybrid search pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Results returned when the request does not say.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Candidates fetched per channel = `top_k × candidate_multiplier` ...
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    /// ... capped at this many.
    #[serde(default = "default_max_candidate_pool")]
    pub max_candidate_pool: usize,
    /// Deadline for each retrieval channel.
    #[serde(default = "default_channel_timeout_ms")]
    pub channel_timeout_ms: u64,
    /// Fusion formula.
    #[serde(default)]
    pub fusion_mode: FusionMode,
    /// Result cache.
    #[serde(default)]
    pub cache: CacheConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            candidate_multiplier: default_candidate_multiplier(),
            max_candidate_pool: default_max_candidate_pool(),
            channel_timeout_ms: default_channel_timeout_ms(),
            fusion_mode: FusionMode::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Candidate pool size for a request of `top_k` results.
    #[must_use]
    pub fn pool_size(&self, top_k: usize) -> usize {
        crate::pipeline::candidate_pool_size(top_k, self.candidate_multiplier, self.max_candidate_pool)
    }

    fn validate(&self) -> Result<()> {
        if self.candidate_multiplier == 0 {
            return Err(MnemoError::Config("search.candidate_multiplier must be at least 1".into()));
        }
        if self.max_candidate_pool == 0 {
            return Err(MnemoError::Config("search.max_candidate_pool must be at least 1".into()));
        }
        if self.channel_timeout_ms == 0 {
            return Err(MnemoError::Config("search.channel_timeout_ms must be positive".into()));
        }
        Ok(())
    }
}

/// Search result cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether responses are cached.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum cached responses.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Time-to-live of one entry.
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: default_cache_capacity(),
            ttl_seconds: default_cache_ttl(),
        }
    }
}

/// LLM connection settings for the relevance judge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider: "none", "ollama", "openai".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Base URL for the LLM API.
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Environment variable holding the API key (OpenAI-compatible providers).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Hard timeout for one HTTP request in milliseconds.
    #[serde(default = "default_5000")]
    pub request_timeout_ms: u64,
    /// Retries after the first failed attempt.
    #[serde(default = "default_1")]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: default_ollama_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            request_timeout_ms: default_5000(),
            max_retries: default_1(),
        }
    }
}

impl LlmConfig {
    fn validate(&self) -> Result<()> {
        match self.provider.as_str() {
            "none" | "ollama" | "openai" => Ok(()),
            other => Err(MnemoError::Config(format!("unknown llm.provider '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde requires named functions)
// ---------------------------------------------------------------------------

fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_provider() -> String { "none".to_string() }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_model() -> String { "qwen2.5:1.5b".to_string() }
fn default_api_key_env() -> String { "MNEMO_LLM_API_KEY".to_string() }
fn default_top_k() -> usize { 5 }
fn default_candidate_multiplier() -> usize { 8 }
fn default_max_candidate_pool() -> usize { 200 }
fn default_channel_timeout_ms() -> u64 { 15_000 }
fn default_cache_capacity() -> usize { 1024 }
fn default_cache_ttl() -> u64 { 300 }
fn default_1() -> u32 { 1 }
fn default_5000() -> u64 { 5000 }

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_toml_gives_defaults() {
        let cfg = MnemoConfig::from_toml("").expect("empty config");
        assert_eq!(cfg, MnemoConfig::default());
        assert_eq!(cfg.search.top_k, 5);
        assert_eq!(cfg.search.pool_size(5), 40);
        assert_eq!(cfg.search.cache.ttl_seconds, 300);
        assert!(!cfg.reranker.enabled);
        assert_eq!(cfg.llm.provider, "none");
    }

    #[test]
    fn sections_override_defaults() {
        let cfg = MnemoConfig::from_toml(
            r#"
            [general]
            log_format = "json"

            [search]
            top_k = 10
            fusion_mode = "weighted_rrf"

            [search.cache]
            enabled = false

            [parameters]
            rrf_k = 42.0

            [optimizer]
            population_size = 8
            seed = 1
            "#,
        )
        .expect("valid config");
        assert_eq!(cfg.general.log_format, LogFormat::Json);
        assert_eq!(cfg.search.top_k, 10);
        assert_eq!(cfg.search.fusion_mode, FusionMode::WeightedRrf);
        assert!(!cfg.search.cache.enabled);
        assert!((cfg.parameters.rrf_k() - 42.0).abs() < 1e-12);
        assert!((cfg.parameters.decay_lambda() - 0.01).abs() < 1e-12);
        assert_eq!(cfg.optimizer.population_size, 8);
    }

    #[test]
    fn rejects_out_of_bounds_parameters() {
        let err = MnemoConfig::from_toml("[parameters]\nrrf_k = 0.5\n").expect_err("rrf_k too small");
        assert!(err.to_string().contains("rrf_k"));
    }

    #[test]
    fn rejects_inconsistent_optimizer() {
        assert!(MnemoConfig::from_toml("[optimizer]\npopulation_size = 2\ntournament_size = 3\n").is_err());
        assert!(MnemoConfig::from_toml("[llm]\nprovider = \"carrier-pigeon\"\n").is_err());
        assert!(MnemoConfig::from_toml("[general]\nlog_level = \"loud\"\n").is_err());
    }

    #[test]
    fn round_trips_through_file() {
        let mut cfg = MnemoConfig::default();
        cfg.search.top_k = 7;
        let text = cfg.to_toml().expect("encode");

        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(text.as_bytes()).expect("write");
        let loaded = MnemoConfig::from_file(file.path()).expect("load");
        assert_eq!(loaded, cfg);
    }
}
