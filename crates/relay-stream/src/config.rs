use std::time::Duration;

use crate::errors::RelayError;
use crate::retry::RetryPolicy;

const DEFAULT_REQUEST_TRIALS: u32 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_BACKOFF_MS: u64 = 500;

/// Relay-wide settings shared by every stream session.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayConfig {
    /// Retries after the first failed connection attempt (`AI_REQUEST_TRIALS`).
    pub request_trials: u32,
    /// Timeout applied to each outbound request.
    pub request_timeout: Duration,
    /// Backoff before the first retry; doubles per retry.
    pub retry_backoff_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_trials: DEFAULT_REQUEST_TRIALS,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry_backoff_ms: DEFAULT_BACKOFF_MS,
        }
    }
}

impl RelayConfig {
    /// Builds a config from the environment.
    ///
    /// - `AI_REQUEST_TRIALS`: retries after the first attempt (default 5).
    /// - `AI_REQUEST_TIMEOUT_SECS`: per-request timeout (default 120).
    /// - `AI_REQUEST_BACKOFF_MS`: first retry backoff (default 500, `0` disables).
    pub fn from_env() -> Result<Self, RelayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, RelayError> {
        let mut config = Self::default();
        if let Some(raw) = lookup("AI_REQUEST_TRIALS") {
            config.request_trials = parse_number("AI_REQUEST_TRIALS", &raw)?;
        }
        if let Some(raw) = lookup("AI_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_number("AI_REQUEST_TIMEOUT_SECS", &raw)?;
            if secs == 0 {
                return Err(RelayError::Config(
                    "AI_REQUEST_TIMEOUT_SECS must be greater than 0".into(),
                ));
            }
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(raw) = lookup("AI_REQUEST_BACKOFF_MS") {
            config.retry_backoff_ms = parse_number("AI_REQUEST_BACKOFF_MS", &raw)?;
        }
        Ok(config)
    }

    pub fn request_trials(mut self, trials: u32) -> Self {
        self.request_trials = trials;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn retry_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.retry_backoff_ms = backoff_ms;
        self
    }

    /// Retry policy derived from the configured trials and backoff.
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.retry_backoff_ms == 0 {
            RetryPolicy::immediate(self.request_trials)
        } else {
            RetryPolicy::exponential(self.request_trials, self.retry_backoff_ms, 2.0)
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, RelayError> {
    raw.trim()
        .parse()
        .map_err(|_| RelayError::Config(format!("{key} must be a non-negative integer, got {raw:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_env_is_empty() {
        let config = RelayConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config, RelayConfig::default());
        assert_eq!(config.retry_policy().max_retries, 5);
    }

    #[test]
    fn env_values_override_defaults() {
        let config = RelayConfig::from_lookup(lookup(&[
            ("AI_REQUEST_TRIALS", "2"),
            ("AI_REQUEST_TIMEOUT_SECS", "30"),
            ("AI_REQUEST_BACKOFF_MS", "0"),
        ]))
        .expect("config");
        assert_eq!(config.request_trials, 2);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_policy(), RetryPolicy::immediate(2));
    }

    #[test]
    fn invalid_trials_are_rejected() {
        let err = RelayConfig::from_lookup(lookup(&[("AI_REQUEST_TRIALS", "many")]))
            .expect_err("should fail");
        assert!(matches!(err, RelayError::Config(msg) if msg.contains("AI_REQUEST_TRIALS")));
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = RelayConfig::from_lookup(lookup(&[("AI_REQUEST_TIMEOUT_SECS", "0")]))
            .expect_err("should fail");
        assert!(matches!(err, RelayError::Config(_)));
    }
}
