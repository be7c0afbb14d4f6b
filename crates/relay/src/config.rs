//! Startup configuration from the environment.

use thiserror::Error;

pub const DEFAULT_WEBSOCKET_PORT: u16 = 3000;
pub const DEFAULT_METRICS_PORT: u16 = 9093;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing credentials: {0} is not set")]
    MissingCredentials(&'static str),

    #[error("missing configuration: {0} is not set")]
    MissingConfiguration(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Upstream WebSocket URL.
    pub stream_url: String,
    /// Upstream bearer credential.
    pub stream_token: String,
    /// Port subscribers connect to.
    pub websocket_port: u16,
    /// Prometheus exporter port.
    pub metrics_port: u16,
    /// Base URL of the trends API. Trends requests are ignored without it.
    pub trends_api_url: Option<String>,
    pub trends_api_token: Option<String>,
}

impl RelayConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let stream_url = get("STREAM_URL").ok_or(ConfigError::MissingConfiguration("STREAM_URL"))?;
        let stream_token =
            get("STREAM_TOKEN").ok_or(ConfigError::MissingCredentials("STREAM_TOKEN"))?;

        let port = |key: &'static str, default: u16| -> Result<u16, ConfigError> {
            match get(key) {
                Some(value) => value.parse().map_err(|_| ConfigError::Invalid { key, value }),
                None => Ok(default),
            }
        };

        Ok(Self {
            stream_url,
            stream_token,
            websocket_port: port("WEBSOCKET_PORT", DEFAULT_WEBSOCKET_PORT)?,
            metrics_port: port("METRICS_PORT", DEFAULT_METRICS_PORT)?,
            trends_api_url: get("TRENDS_API_URL"),
            trends_api_token: get("TRENDS_API_TOKEN"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("STREAM_URL", "wss://stream.example.com/filter"),
            ("STREAM_TOKEN", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.stream_url, "wss://stream.example.com/filter");
        assert_eq!(config.stream_token, "secret");
        assert_eq!(config.websocket_port, DEFAULT_WEBSOCKET_PORT);
        assert_eq!(config.metrics_port, DEFAULT_METRICS_PORT);
        assert_eq!(config.trends_api_url, None);
    }

    #[test]
    fn test_overrides() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("STREAM_URL", "ws://localhost:9000"),
            ("STREAM_TOKEN", "secret"),
            ("WEBSOCKET_PORT", "443"),
            ("METRICS_PORT", "9100"),
            ("TRENDS_API_URL", "https://api.example.com/1.1"),
        ]))
        .unwrap();

        assert_eq!(config.websocket_port, 443);
        assert_eq!(config.metrics_port, 9100);
        assert_eq!(config.trends_api_url.as_deref(), Some("https://api.example.com/1.1"));
    }

    #[test]
    fn test_missing_credentials() {
        let err = RelayConfig::from_lookup(lookup(&[("STREAM_URL", "ws://localhost")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::MissingCredentials("STREAM_TOKEN"));

        let err = RelayConfig::from_lookup(lookup(&[
            ("STREAM_URL", "ws://localhost"),
            ("STREAM_TOKEN", "  "),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingCredentials("STREAM_TOKEN"));
    }

    #[test]
    fn test_missing_stream_url() {
        let err = RelayConfig::from_lookup(lookup(&[("STREAM_TOKEN", "secret")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingConfiguration("STREAM_URL"));
    }

    #[test]
    fn test_invalid_port() {
        let err = RelayConfig::from_lookup(lookup(&[
            ("STREAM_URL", "ws://localhost"),
            ("STREAM_TOKEN", "secret"),
            ("WEBSOCKET_PORT", "http"),
        ]))
        .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                key: "WEBSOCKET_PORT",
                value: "http".to_string()
            }
        );
    }
}
