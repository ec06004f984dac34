// Process configuration, read once at startup from the environment

use std::{net::SocketAddr, str::FromStr, time::Duration};

use thiserror::Error;

use crate::{
    retry::{Backoff, RetryPolicy, DEFAULT_BACKOFF_STEP},
    upstream::UpstreamConfig,
};

pub const DEFAULT_PORT: u16 = 3000;

pub const ENV_PORT: &str = "PORT";
pub const ENV_UPSTREAM_URL: &str = "RESULTS_UPSTREAM_URL";
pub const ENV_ACCEPT_INVALID_CERTS: &str = "RESULTS_ACCEPT_INVALID_CERTS";
pub const ENV_MAX_ATTEMPTS: &str = "RESULTS_MAX_ATTEMPTS";
pub const ENV_ATTEMPT_TIMEOUT_MS: &str = "RESULTS_ATTEMPT_TIMEOUT_MS";
pub const ENV_BACKOFF_STEP_MS: &str = "RESULTS_BACKOFF_STEP_MS";
/// `linear` (default) or `exponential`; the step doubles as the exponential base.
pub const ENV_BACKOFF: &str = "RESULTS_BACKOFF";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub upstream: UpstreamConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            upstream: UpstreamConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = parse::<u16, _>(&lookup, ENV_PORT)? {
            config.bind_addr.set_port(port);
        }
        if let Some(endpoint) = lookup(ENV_UPSTREAM_URL).filter(|v| !v.trim().is_empty()) {
            config.upstream.endpoint = endpoint.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_ACCEPT_INVALID_CERTS) {
            config.upstream.accept_invalid_certs = parse_flag(ENV_ACCEPT_INVALID_CERTS, &raw)?;
        }

        let retry = &mut config.upstream.retry;
        if let Some(attempts) = parse::<u32, _>(&lookup, ENV_MAX_ATTEMPTS)? {
            if attempts == 0 {
                return Err(invalid(ENV_MAX_ATTEMPTS, "0", "at least one attempt is required"));
            }
            retry.max_attempts = attempts;
        }
        if let Some(ms) = parse::<u64, _>(&lookup, ENV_ATTEMPT_TIMEOUT_MS)? {
            // 0 disables the per-attempt timeout
            retry.attempt_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        let step = parse::<u64, _>(&lookup, ENV_BACKOFF_STEP_MS)?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BACKOFF_STEP);
        retry.backoff = match lookup(ENV_BACKOFF) {
            None => Backoff::Linear { step },
            Some(raw) => parse_backoff(&raw, step)?,
        };

        Ok(config)
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.upstream.retry
    }
}

fn parse<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
    }
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(invalid(key, raw, "expected a boolean")),
    }
}

fn parse_backoff(raw: &str, step: Duration) -> Result<Backoff, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "linear" => Ok(Backoff::Linear { step }),
        "exponential" => Ok(Backoff::exponential(step)),
        _ => Err(invalid(ENV_BACKOFF, raw, "expected linear or exponential")),
    }
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
