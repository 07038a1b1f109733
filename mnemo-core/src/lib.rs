//! # MNEMO Core Library
//!
//! Hybrid memory retrieval for conversational game characters, with ranking
//! parameters that tune themselves.
//!
//! A query flows through:
//!
//! - **Fan-out**: lexical and vector engines are queried concurrently ([`pipeline`])
//! - **Fusion**: Reciprocal Rank Fusion of the two ranked lists ([`fusion`])
//! - **Rerank**: exponential importance decay and soft type penalties ([`retrieval`])
//! - **Judge**: optional, fail-open reordering by an external LLM ([`judge`])
//!
//! The [`optimizer`] re-tunes the shared [`SearchParameters`] with a genetic
//! algorithm against labeled query/ground-truth pairs, re-running the same
//! fusion pipeline as its fitness function.
//!
//! Collaborators (engines, embedder, judge) are traits; nothing in this crate
//! talks to a network or a disk except [`config::MnemoConfig::from_file`].

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod decay;
pub mod error;
pub mod fusion;
pub mod judge;
pub mod logging;
pub mod metrics;
pub mod optimizer;
pub mod params;
pub mod pipeline;
pub mod retrieval;
pub mod types;

pub use config::MnemoConfig;
pub use error::{MnemoError, Result};
pub use fusion::{FusionMode, fuse};
pub use judge::{JudgeOutcome, RelevanceJudge};
pub use optimizer::{GaConfig, GeneticOptimizer, OptimizationResult};
pub use params::{ParameterField, SearchParameters};
pub use pipeline::{HybridSearcher, SearchRequest, SearchResponse};
pub use retrieval::{RetrievalResult, rerank};
pub use types::*;
