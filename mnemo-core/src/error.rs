//! Error types for the MNEMO core library.
//!
//! Only logic and configuration failures live here. Collaborator outages at
//! query time are modelled separately ([`crate::pipeline::ChannelError`],
//! [`crate::judge::JudgeError`]) because they degrade the ranking instead of
//! failing the call.

use thiserror::Error;

/// Boxed error returned by caller-supplied callbacks (fitness, search).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for all MNEMO operations.
#[derive(Error, Debug)]
pub enum MnemoError {
    /// A parameter value lies outside its declared bounds (or is not finite).
    #[error("Invalid parameter {field}: {value} (allowed: {min}..={max})")]
    InvalidParameter {
        /// Parameter name.
        field: &'static str,
        /// Rejected value.
        value: f64,
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// A parameter map contained a key that is not a known parameter.
    #[error("Unknown search parameter: {0}")]
    UnknownParameter(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The fitness callback failed; the optimization run is aborted.
    #[error("Fitness evaluation failed at generation {generation}, individual {individual}: {source}")]
    FitnessFailed {
        /// Zero-based generation being evaluated.
        generation: usize,
        /// Index of the individual within the population.
        individual: usize,
        /// The callback's error.
        #[source]
        source: BoxError,
    },

    /// The fitness callback returned NaN or an infinity.
    #[error("Fitness evaluation returned {value} at generation {generation}, individual {individual}")]
    FitnessNotFinite {
        /// Zero-based generation being evaluated.
        generation: usize,
        /// Index of the individual within the population.
        individual: usize,
        /// The offending value.
        value: f64,
    },

    /// The worker pool for fitness evaluation could not be built.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, MnemoError>;
