//! Configuration loading and representation.
//!
//! Everything is read from the process environment. Unset optional variables
//! fall back to defaults; malformed values are errors, never silently ignored.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::external::OpenAiSettings;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres URL; `None` selects the in-memory store and ledger.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Bearer token batch-processing callers must present.
    pub worker_token: String,
    pub provider: OpenAiSettings,
    pub default_batch_size: usize,
    pub max_batch_size: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| get(name).filter(|v| !v.trim().is_empty());

        let bind_addr: SocketAddr =
            parse_or(&get, "LOTWISE_BIND_ADDR", "0.0.0.0:8080".parse().ok())?;
        let worker_token =
            get("LOTWISE_WORKER_TOKEN").ok_or(ConfigError::Missing("LOTWISE_WORKER_TOKEN"))?;
        let api_key = get("LOTWISE_PROVIDER_API_KEY")
            .or_else(|| get("OPENAI_API_KEY"))
            .ok_or(ConfigError::Missing("LOTWISE_PROVIDER_API_KEY"))?;
        let timeout_secs: u64 = parse_or(&get, "LOTWISE_PROVIDER_TIMEOUT_SECS", Some(60))?;
        let default_batch_size: usize = parse_or(&get, "LOTWISE_DEFAULT_BATCH_SIZE", Some(10))?;
        let max_batch_size: usize = parse_or(&get, "LOTWISE_MAX_BATCH_SIZE", Some(50))?;

        if default_batch_size == 0 || default_batch_size > max_batch_size {
            return Err(ConfigError::Invalid {
                name: "LOTWISE_DEFAULT_BATCH_SIZE",
                reason: format!("must be within 1..={max_batch_size}"),
            });
        }

        let database_max_connections: u32 =
            parse_or(&get, "LOTWISE_DATABASE_MAX_CONNECTIONS", Some(10))?;

        Ok(Self {
            bind_addr,
            database_url: get("DATABASE_URL"),
            database_max_connections,
            worker_token,
            provider: OpenAiSettings {
                base_url: get("LOTWISE_PROVIDER_BASE_URL")
                    .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
                api_key,
                chat_model: get("LOTWISE_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
                embedding_model: get("LOTWISE_EMBEDDING_MODEL")
                    .unwrap_or_else(|| "text-embedding-3-small".to_string()),
                timeout: Duration::from_secs(timeout_secs),
            },
            default_batch_size,
            max_batch_size,
        })
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: Option<T>,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        None => default.ok_or(ConfigError::Missing(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply() {
        let cfg = AppConfig::from_vars(&vars(&[
            ("LOTWISE_WORKER_TOKEN", "secret"),
            ("OPENAI_API_KEY", "sk-test"),
        ]))
        .unwrap();

        assert_eq!(cfg.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.provider.api_key, "sk-test");
        assert_eq!(cfg.provider.chat_model, "gpt-4o-mini");
        assert_eq!(cfg.provider.timeout, Duration::from_secs(60));
        assert_eq!(cfg.default_batch_size, 10);
        assert_eq!(cfg.max_batch_size, 50);
    }

    #[test]
    fn worker_token_is_required() {
        let err = AppConfig::from_vars(&vars(&[("OPENAI_API_KEY", "sk")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing("LOTWISE_WORKER_TOKEN"));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let err = AppConfig::from_vars(&vars(&[
            ("LOTWISE_WORKER_TOKEN", "  "),
            ("OPENAI_API_KEY", "sk"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::Missing("LOTWISE_WORKER_TOKEN"));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = AppConfig::from_vars(&vars(&[
            ("LOTWISE_WORKER_TOKEN", "t"),
            ("OPENAI_API_KEY", "sk"),
            ("LOTWISE_MAX_BATCH_SIZE", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "LOTWISE_MAX_BATCH_SIZE", .. }));
    }

    #[test]
    fn default_batch_must_fit_max() {
        let err = AppConfig::from_vars(&vars(&[
            ("LOTWISE_WORKER_TOKEN", "t"),
            ("OPENAI_API_KEY", "sk"),
            ("LOTWISE_DEFAULT_BATCH_SIZE", "80"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "LOTWISE_DEFAULT_BATCH_SIZE", .. }));
    }
}
