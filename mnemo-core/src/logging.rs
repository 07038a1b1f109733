//! Tracing subscriber setup.
//!
//! Libraries only emit `tracing` events; the embedding application calls
//! [`init`] once at startup. `RUST_LOG` takes precedence over the configured
//! level.

use tracing_subscriber::EnvFilter;

use crate::config::{GeneralConfig, LogFormat};

/// Build the filter: `RUST_LOG` if set and valid, else `general.log_level`, else `info`.
#[must_use]
pub fn env_filter(general: &GeneralConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&general.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global fmt subscriber.
///
/// Returns `false` if a subscriber was already installed (the call is then a no-op).
pub fn init(general: &GeneralConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(general))
        .with_target(true);
    let installed = match general.log_format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let general = GeneralConfig {
            log_level: "debug".into(),
            log_format: LogFormat::Compact,
        };
        let _ = init(&general);
        assert!(!init(&general));
    }
}
