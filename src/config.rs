//! Configuration management.
//!
//! Configuration is set via environment variables:
//! - `OPENROUTER_API_KEY` - Required. API key for the planning oracle.
//! - `PLANNER_MODEL` - Optional. Oracle model identifier. Defaults to `openai/gpt-4o-mini`.
//! - `HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `PORT` - Optional. Server port. Defaults to `3000`.
//! - `MAX_TURNS` - Optional. Turn budget per task. Defaults to `20`.
//! - `TASK_DEADLINE_SECS` - Optional. Wall-clock budget per task. Defaults to `300`.
//! - `ACTION_TIMEOUT_MS` - Optional. Per-browser-action deadline. Defaults to `15000`.
//! - `PLANNER_FAILURE_LIMIT` - Optional. Consecutive planner failures before a task fails. Defaults to `3`.
//! - `HISTORY_WINDOW` - Optional. Number of recent turns sent to the oracle. Defaults to `20`.
//! - `BROWSER_CDP_URL` - Optional. Chrome remote-debugging endpoint. Defaults to `http://127.0.0.1:9222`.
//! - `STRICT_LOCATORS` - Optional. Treat ambiguous element locators as errors. Defaults to `false`.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key for the planning oracle
    pub api_key: String,

    /// Oracle model identifier (OpenRouter format)
    pub planner_model: String,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Maximum turns per task
    pub max_turns: usize,

    /// Wall-clock deadline per task
    pub task_deadline: Duration,

    /// Per-action deadline inside the browser adapter
    pub action_timeout: Duration,

    /// Consecutive planner failures tolerated before a task fails
    pub planner_failure_limit: u32,

    /// Number of recent turns included in the oracle context
    pub history_window: usize,

    /// Chrome DevTools Protocol endpoint
    pub cdp_url: String,

    /// Treat ambiguous element locators as hard failures
    pub strict_locators: bool,
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string()))
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `OPENROUTER_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()))?;

        let planner_model =
            std::env::var("PLANNER_MODEL").unwrap_or_else(|_| "openai/gpt-4o-mini".to_string());

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let cdp_url = std::env::var("BROWSER_CDP_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:9222".to_string());

        let strict_locators = std::env::var("STRICT_LOCATORS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            api_key,
            planner_model,
            host,
            port: parse_var("PORT", "3000")?,
            max_turns: parse_var("MAX_TURNS", "20")?,
            task_deadline: Duration::from_secs(parse_var("TASK_DEADLINE_SECS", "300")?),
            action_timeout: Duration::from_millis(parse_var("ACTION_TIMEOUT_MS", "15000")?),
            planner_failure_limit: parse_var("PLANNER_FAILURE_LIMIT", "3")?,
            history_window: parse_var("HISTORY_WINDOW", "20")?,
            cdp_url,
            strict_locators,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, planner_model: String) -> Self {
        Self {
            api_key,
            planner_model,
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_turns: 20,
            task_deadline: Duration::from_secs(300),
            action_timeout: Duration::from_millis(15_000),
            planner_failure_limit: 3,
            history_window: 20,
            cdp_url: "http://127.0.0.1:9222".to_string(),
            strict_locators: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::new("key".to_string(), "model".to_string());
        assert_eq!(config.max_turns, 20);
        assert_eq!(config.planner_failure_limit, 3);
        assert!(!config.strict_locators);
        assert_eq!(config.action_timeout, Duration::from_millis(15_000));
    }
}
