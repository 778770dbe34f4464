use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};

use crate::{ApiError, Result};

/// Bounds the number of attempts and the delay between them.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Base retry delay in milliseconds (linear strategy).
    pub base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
        }
    }

    /// A policy that makes a single attempt.
    pub fn no_retry() -> Self {
        Self::new(1, 0)
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// The delay grows linearly: `base_delay_ms × attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
        }
    }
}

/// Configures the base URL, timeout, retry, header and cache behavior.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Prefix for relative request URLs. May be empty.
    pub base_url: String,
    /// Per-attempt timeout in milliseconds.
    pub default_timeout_ms: u64,
    pub retry_policy: RetryPolicy,
    /// Headers sent with every request unless overridden per call.
    pub default_headers: BTreeMap<String, String>,
    /// TTL used by `cached_get` when the caller gives none.
    pub cache_ttl_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        let mut default_headers = BTreeMap::new();
        default_headers.insert("Content-Type".to_owned(), "application/json".to_owned());
        Self {
            base_url: String::new(),
            default_timeout_ms: 10_000,
            retry_policy: RetryPolicy::default(),
            default_headers,
            cache_ttl_ms: 30 * 60 * 1_000,
        }
    }
}

impl ClientOptions {
    /// Default options pointed at `base_url`.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Reads options from environment variables.
    ///
    /// - `PREDICT_API_BASE_URL` — required
    /// - `PREDICT_API_TIMEOUT_MS`, `PREDICT_API_MAX_ATTEMPTS`,
    ///   `PREDICT_API_RETRY_DELAY_MS`, `PREDICT_API_CACHE_TTL_MS` — optional
    ///
    /// The result is validated before it is returned.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("PREDICT_API_BASE_URL").map_err(|_| {
            ApiError::Config("missing PREDICT_API_BASE_URL environment variable".to_owned())
        })?;
        if base_url.trim().is_empty() {
            return Err(ApiError::Config(
                "PREDICT_API_BASE_URL is set but empty".to_owned(),
            ));
        }

        let mut options = Self::with_base_url(base_url.trim());
        if let Some(value) = env_number("PREDICT_API_TIMEOUT_MS")? {
            options.default_timeout_ms = value;
        }
        if let Some(value) = env_number("PREDICT_API_MAX_ATTEMPTS")? {
            options.retry_policy.max_attempts = u32::try_from(value).map_err(|_| {
                ApiError::Config("PREDICT_API_MAX_ATTEMPTS is out of range".to_owned())
            })?;
        }
        if let Some(value) = env_number("PREDICT_API_RETRY_DELAY_MS")? {
            options.retry_policy.base_delay_ms = value;
        }
        if let Some(value) = env_number("PREDICT_API_CACHE_TTL_MS")? {
            options.cache_ttl_ms = value;
        }

        options.validate()?;
        Ok(options)
    }

    /// Checks every option against its allowed range.
    pub fn validate(&self) -> Result<()> {
        let base = self.base_url.trim();
        if !base.is_empty() && !is_absolute(base) {
            return Err(ApiError::Config(format!(
                "base_url must be an absolute http(s) URL, got '{base}'"
            )));
        }
        if self.default_timeout_ms == 0 {
            return Err(ApiError::Config(
                "default_timeout_ms must be greater than zero".to_owned(),
            ));
        }
        if self.retry_policy.max_attempts == 0 {
            return Err(ApiError::Config(
                "retry_policy.max_attempts must be at least 1".to_owned(),
            ));
        }
        for (name, value) in &self.default_headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ApiError::Config(format!("invalid header name '{name}'")))?;
            HeaderValue::from_str(value)
                .map_err(|_| ApiError::Config(format!("invalid value for header '{name}'")))?;
        }
        Ok(())
    }

    pub(crate) fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub(crate) fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }
}

pub(crate) fn is_absolute(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn env_number(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ApiError::Config(format!("{name} must be a non-negative integer"))),
        Err(_) => Ok(None),
    }
}
