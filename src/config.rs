use std::{env, net::SocketAddr, time::Duration};

use reqwest::Url;
use thiserror::Error;

pub const DEFAULT_BACKEND_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 1800;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_token: String,
    pub bind_addr: String,
    pub bind_port: u16,
    pub backend_url: Url,
    pub backend_token: Option<String>,
    pub backend_timeout: Duration,
    pub session_idle: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IMPORT_API_TOKEN is required and must not be empty")]
    MissingApiToken,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("invalid bind address or port")]
    InvalidSocket,
    #[error("FLEET_BACKEND_URL is required")]
    MissingBackendUrl,
    #[error("FLEET_BACKEND_URL must be an absolute http(s) URL")]
    InvalidBackendUrl,
    #[error("FLEET_BACKEND_TIMEOUT_SECS must be a positive integer")]
    InvalidBackendTimeout,
    #[error("IMPORT_SESSION_IDLE_SECS must be a positive integer")]
    InvalidSessionIdle,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_token = non_empty_var("IMPORT_API_TOKEN").ok_or(ConfigError::MissingApiToken)?;

        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
        let bind_port = env::var("BIND_PORT")
            .ok()
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(8080);

        let backend_url = non_empty_var("FLEET_BACKEND_URL")
            .ok_or(ConfigError::MissingBackendUrl)
            .and_then(|value| parse_backend_url(&value))?;
        let backend_token = non_empty_var("FLEET_BACKEND_TOKEN");
        let backend_timeout = positive_secs_var(
            "FLEET_BACKEND_TIMEOUT_SECS",
            ConfigError::InvalidBackendTimeout,
        )?
        .unwrap_or(DEFAULT_BACKEND_TIMEOUT_SECS);
        let session_idle =
            positive_secs_var("IMPORT_SESSION_IDLE_SECS", ConfigError::InvalidSessionIdle)?
                .unwrap_or(DEFAULT_SESSION_IDLE_SECS);

        let config = Self {
            api_token,
            bind_addr,
            bind_port,
            backend_url,
            backend_token,
            backend_timeout: Duration::from_secs(backend_timeout),
            session_idle: Duration::from_secs(session_idle),
        };

        let _ = config.bind_socket()?;
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn positive_secs_var(name: &str, invalid: ConfigError) -> Result<Option<u64>, ConfigError> {
    non_empty_var(name)
        .map(|value| value.parse::<u64>().ok().filter(|secs| *secs > 0).ok_or(invalid))
        .transpose()
}

fn parse_backend_url(value: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(value).map_err(|_| ConfigError::InvalidBackendUrl)?;
    if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
        return Err(ConfigError::InvalidBackendUrl);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    fn set_required() {
        env::set_var("IMPORT_API_TOKEN", "abc");
        env::set_var("FLEET_BACKEND_URL", "http://fleet.local:8000");
        env::remove_var("BIND_ADDR");
        env::remove_var("BIND_PORT");
        env::remove_var("FLEET_BACKEND_TOKEN");
        env::remove_var("FLEET_BACKEND_TIMEOUT_SECS");
        env::remove_var("IMPORT_SESSION_IDLE_SECS");
    }

    #[test]
    #[serial]
    fn parse_defaults() {
        set_required();

        let config = Config::from_env().expect("config should parse");
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert_eq!(config.bind_port, 8080);
        assert_eq!(config.backend_url.as_str(), "http://fleet.local:8000/");
        assert_eq!(config.backend_token, None);
        assert_eq!(
            config.backend_timeout,
            Duration::from_secs(DEFAULT_BACKEND_TIMEOUT_SECS)
        );
        assert_eq!(
            config.session_idle,
            Duration::from_secs(DEFAULT_SESSION_IDLE_SECS)
        );
    }

    #[test]
    #[serial]
    fn missing_token_fails() {
        set_required();
        env::remove_var("IMPORT_API_TOKEN");

        let err = Config::from_env().expect_err("expected missing token error");
        assert!(matches!(err, ConfigError::MissingApiToken));
    }

    #[test]
    #[serial]
    fn missing_backend_url_fails() {
        set_required();
        env::remove_var("FLEET_BACKEND_URL");

        let err = Config::from_env().expect_err("expected missing backend url");
        assert!(matches!(err, ConfigError::MissingBackendUrl));
    }

    #[test]
    #[serial]
    fn non_http_backend_url_fails() {
        set_required();
        env::set_var("FLEET_BACKEND_URL", "ftp://fleet.local");

        let err = Config::from_env().expect_err("expected invalid backend url");
        assert!(matches!(err, ConfigError::InvalidBackendUrl));
    }

    #[test]
    #[serial]
    fn backend_token_and_timeout_are_read() {
        set_required();
        env::set_var("FLEET_BACKEND_TOKEN", " secret ");
        env::set_var("FLEET_BACKEND_TIMEOUT_SECS", "5");

        let config = Config::from_env().expect("config should parse");
        assert_eq!(config.backend_token.as_deref(), Some("secret"));
        assert_eq!(config.backend_timeout, Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn zero_timeout_fails() {
        set_required();
        env::set_var("FLEET_BACKEND_TIMEOUT_SECS", "0");

        let err = Config::from_env().expect_err("expected invalid timeout");
        assert!(matches!(err, ConfigError::InvalidBackendTimeout));
    }

    #[test]
    #[serial]
    fn session_idle_is_read_and_validated() {
        set_required();
        env::set_var("IMPORT_SESSION_IDLE_SECS", "120");
        let config = Config::from_env().expect("config should parse");
        assert_eq!(config.session_idle, Duration::from_secs(120));

        env::set_var("IMPORT_SESSION_IDLE_SECS", "never");
        let err = Config::from_env().expect_err("expected invalid idle period");
        assert!(matches!(err, ConfigError::InvalidSessionIdle));
    }

    #[test]
    #[serial]
    fn invalid_port_fails() {
        set_required();
        env::set_var("BIND_PORT", "99999");

        let err = Config::from_env().expect_err("expected invalid port");
        assert!(matches!(err, ConfigError::InvalidPort));
    }
}
