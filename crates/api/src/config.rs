//! Application configuration loaded from environment variables.

use std::time::Duration;

use collection::SagaOptions;
use saga::Backoff;

/// Server and saga configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `SAGA_USE_TRANSACTIONS`: wrap document writes in a transaction (default: `true`)
/// - `SAGA_BACKOFF`: `none`, `linear` or `exponential` (default: `linear`)
/// - `SAGA_RETRY_BASE_MS`: base retry delay in milliseconds (default: `1000`)
/// - `SAGA_STEP_TIMEOUT_MS`: per-attempt deadline in milliseconds (default: none)
///
/// The log filter comes from `RUST_LOG`, read by the tracing subscriber
/// before this is loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub use_transactions: bool,
    pub backoff: Backoff,
    pub step_timeout: Option<Duration>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    ///
    /// Unparseable values fall back to their defaults with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let base = lookup("SAGA_RETRY_BASE_MS")
            .and_then(|ms| parse_or_warn::<u64>("SAGA_RETRY_BASE_MS", &ms))
            .map(Duration::from_millis);
        let mut backoff = lookup("SAGA_BACKOFF")
            .and_then(|policy| parse_or_warn::<Backoff>("SAGA_BACKOFF", &policy))
            .unwrap_or(defaults.backoff);
        if let Some(base) = base {
            backoff = backoff.with_base(base);
        }

        Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: lookup("PORT")
                .and_then(|p| parse_or_warn("PORT", &p))
                .unwrap_or(defaults.port),
            use_transactions: lookup("SAGA_USE_TRANSACTIONS")
                .and_then(|v| parse_or_warn("SAGA_USE_TRANSACTIONS", &v))
                .unwrap_or(defaults.use_transactions),
            backoff,
            step_timeout: lookup("SAGA_STEP_TIMEOUT_MS")
                .and_then(|ms| parse_or_warn::<u64>("SAGA_STEP_TIMEOUT_MS", &ms))
                .map(Duration::from_millis),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Saga options for the collection service.
    pub fn saga_options(&self) -> SagaOptions {
        SagaOptions {
            use_transactions: self.use_transactions,
            backoff: self.backoff,
            step_timeout: self.step_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            use_transactions: true,
            backoff: Backoff::default(),
            step_timeout: None,
        }
    }
}

fn parse_or_warn<T>(key: &str, value: &str) -> Option<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            tracing::warn!(key, value, error = %err, "ignoring invalid configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert!(config.use_transactions);
        assert_eq!(config.backoff, Backoff::linear(Duration::from_secs(1)));
        assert_eq!(config.step_timeout, None);
    }

    #[test]
    fn test_empty_environment_matches_defaults() {
        let config = from_pairs(&[]);
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.backoff, Backoff::default());
    }

    #[test]
    fn test_addr_formatting() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };
        assert_eq!(config.addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_saga_settings_from_environment() {
        let config = from_pairs(&[
            ("SAGA_USE_TRANSACTIONS", "false"),
            ("SAGA_BACKOFF", "Exponential"),
            ("SAGA_RETRY_BASE_MS", "250"),
            ("SAGA_STEP_TIMEOUT_MS", "5000"),
        ]);

        let options = config.saga_options();
        assert!(!options.use_transactions);
        assert_eq!(
            options.backoff,
            Backoff::exponential(Duration::from_millis(250))
        );
        assert_eq!(options.step_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = from_pairs(&[
            ("PORT", "http"),
            ("SAGA_BACKOFF", "fibonacci"),
            ("SAGA_USE_TRANSACTIONS", "maybe"),
        ]);
        assert_eq!(config.port, 3000);
        assert_eq!(config.backoff, Backoff::default());
        assert!(config.use_transactions);
    }
}
