use std::env;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_LLM_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_LLM_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub enum StoreConfig {
    Memory,
    Rest(RestStoreConfig),
}

#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub enum SuggesterConfig {
    Rules,
    Llm(LlmConfig),
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub compensation_queue_size: usize,
    pub compensation_max_attempts: u32,
    pub compensation_retry_delay: Duration,
    pub static_dir: Option<String>,
    pub store: StoreConfig,
    pub suggester: SuggesterConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so tests never touch
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("compact") => LogFormat::Compact,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(AppError::Config(format!(
                    "LOG_FORMAT must be compact or json, got {other}"
                )));
            }
        };

        let store = match lookup("STORE_BACKEND").as_deref() {
            Some("memory") => StoreConfig::Memory,
            None | Some("rest") => StoreConfig::Rest(RestStoreConfig {
                base_url: required(&lookup, "STORE_URL")?,
                api_key: required(&lookup, "STORE_API_KEY")?,
                timeout: Duration::from_millis(parse_or_default(&lookup, "STORE_TIMEOUT_MS", 5_000)?),
            }),
            Some(other) => {
                return Err(AppError::Config(format!(
                    "STORE_BACKEND must be rest or memory, got {other}"
                )));
            }
        };

        let suggester = match lookup("SUGGESTER").as_deref() {
            Some("rules") => SuggesterConfig::Rules,
            None | Some("llm") => SuggesterConfig::Llm(LlmConfig {
                api_url: lookup("LLM_API_URL").unwrap_or_else(|| DEFAULT_LLM_API_URL.to_string()),
                api_key: required(&lookup, "LLM_API_KEY")?,
                model: lookup("LLM_MODEL").unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
                timeout: Duration::from_millis(parse_or_default(&lookup, "LLM_TIMEOUT_MS", 15_000)?),
            }),
            Some(other) => {
                return Err(AppError::Config(format!(
                    "SUGGESTER must be llm or rules, got {other}"
                )));
            }
        };

        Ok(Self {
            http_port: parse_or_default(&lookup, "HTTP_PORT", 3000)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
            event_buffer_size: parse_positive(&lookup, "EVENT_BUFFER_SIZE", 1024)?,
            compensation_queue_size: parse_positive(&lookup, "COMPENSATION_QUEUE_SIZE", 256)?,
            compensation_max_attempts: parse_positive(&lookup, "COMPENSATION_MAX_ATTEMPTS", 5)?,
            compensation_retry_delay: Duration::from_millis(parse_or_default(
                &lookup,
                "COMPENSATION_RETRY_DELAY_MS",
                500,
            )?),
            static_dir: lookup("STATIC_DIR").filter(|dir| !dir.trim().is_empty()),
            store,
            suggester,
        })
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(AppError::Config(format!("{key} is required"))),
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Config(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}

/// Channel capacities and retry counts, where zero is never valid.
fn parse_positive<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    let value = parse_or_default(lookup, key, default)?;
    if value == T::default() {
        return Err(AppError::Config(format!("{key} must be greater than zero")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{Config, StoreConfig, SuggesterConfig};
    use crate::error::AppError;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_store_credentials_is_a_config_error() {
        let err = Config::from_lookup(lookup(&[("SUGGESTER", "rules")])).unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("STORE_URL")));
    }

    #[test]
    fn missing_llm_key_is_a_config_error() {
        let err = Config::from_lookup(lookup(&[("STORE_BACKEND", "memory")])).unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("LLM_API_KEY")));
    }

    #[test]
    fn explicit_local_backends_need_no_credentials() {
        let config = Config::from_lookup(lookup(&[
            ("STORE_BACKEND", "memory"),
            ("SUGGESTER", "rules"),
            ("HTTP_PORT", "8080"),
        ]))
        .unwrap();

        assert_eq!(config.http_port, 8080);
        assert!(matches!(config.store, StoreConfig::Memory));
        assert!(matches!(config.suggester, SuggesterConfig::Rules));
    }

    #[test]
    fn full_remote_config_is_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("STORE_URL", "https://db.example.com"),
            ("STORE_API_KEY", "store-key"),
            ("LLM_API_KEY", "llm-key"),
            ("LLM_TIMEOUT_MS", "2000"),
        ]))
        .unwrap();

        match config.suggester {
            SuggesterConfig::Llm(llm) => {
                assert_eq!(llm.api_key, "llm-key");
                assert_eq!(llm.timeout.as_millis(), 2000);
            }
            SuggesterConfig::Rules => panic!("expected llm suggester"),
        }
        assert!(matches!(config.store, StoreConfig::Rest(_)));
    }

    #[test]
    fn invalid_number_is_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("STORE_BACKEND", "memory"),
            ("SUGGESTER", "rules"),
            ("HTTP_PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn zero_sized_queues_are_rejected() {
        for key in ["COMPENSATION_QUEUE_SIZE", "EVENT_BUFFER_SIZE", "COMPENSATION_MAX_ATTEMPTS"] {
            let err = Config::from_lookup(lookup(&[
                ("STORE_BACKEND", "memory"),
                ("SUGGESTER", "rules"),
                (key, "0"),
            ]))
            .unwrap_err();
            assert!(
                matches!(err, AppError::Config(ref msg) if msg.contains(key) && msg.contains("greater than zero")),
                "{key} accepted zero"
            );
        }
    }
}
