use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Build the filter for the engine: `RUST_LOG` when set, otherwise the
/// configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Install the global fmt subscriber. Returns `false` when a subscriber
/// was already installed by the host application.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_not_an_error() {
        let config = LoggingConfig::default();
        let _ = init_tracing(&config);
        assert!(!init_tracing(&config));
    }

    #[test]
    fn filter_uses_configured_level_without_env() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        let config = LoggingConfig {
            level: "warn".to_string(),
        };
        assert_eq!(env_filter(&config).to_string(), "warn");
    }
}
