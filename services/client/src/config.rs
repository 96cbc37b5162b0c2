//! services/client/src/config.rs
//!
//! Defines the client's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// When unset the client runs against the in-process store and auth provider.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub chat_model: String,
    pub video_model: String,
    pub profile_timeout: Duration,
    pub video_poll_interval: Duration,
    pub video_max_polls: u32,
    pub recent_login_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            log_level: Level::INFO,
            openai_api_key: None,
            gemini_api_key: None,
            chat_model: "gpt-4o-mini".to_string(),
            video_model: "veo-3.1-fast-generate-preview".to_string(),
            profile_timeout: Duration::from_millis(5000),
            video_poll_interval: Duration::from_secs(5),
            video_max_polls: 120,
            recent_login_window: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let profile_timeout = parse_var::<u64>(&lookup, "PROFILE_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.profile_timeout);
        let video_poll_interval = parse_var::<u64>(&lookup, "VIDEO_POLL_INTERVAL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.video_poll_interval);
        let video_max_polls =
            parse_var::<u32>(&lookup, "VIDEO_MAX_POLLS")?.unwrap_or(defaults.video_max_polls);
        if video_max_polls == 0 {
            return Err(ConfigError::InvalidValue(
                "VIDEO_MAX_POLLS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let recent_login_window = parse_var::<u64>(&lookup, "RECENT_LOGIN_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.recent_login_window);

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.is_empty()),
            log_level,
            openai_api_key: lookup("OPENAI_API_KEY"),
            gemini_api_key: lookup("GEMINI_API_KEY"),
            chat_model: lookup("CHAT_MODEL").unwrap_or(defaults.chat_model),
            video_model: lookup("VIDEO_MODEL").unwrap_or(defaults.video_model),
            profile_timeout,
            video_poll_interval,
            video_max_polls,
            recent_login_window,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.profile_timeout, Duration::from_secs(5));
        assert_eq!(config.video_max_polls, 120);
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn numeric_overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("PROFILE_TIMEOUT_MS", "250"),
            ("VIDEO_POLL_INTERVAL_SECS", "2"),
            ("RUST_LOG", "debug"),
        ]))
        .unwrap();
        assert_eq!(config.profile_timeout, Duration::from_millis(250));
        assert_eq!(config.video_poll_interval, Duration::from_secs(2));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn invalid_values_are_reported_with_their_variable() {
        let err = Config::from_lookup(lookup(&[("VIDEO_MAX_POLLS", "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key, _) if key == "VIDEO_MAX_POLLS"));
    }
}
