use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use reqwest::Method;

use crate::options::is_absolute;
use crate::RetryPolicy;

/// Body attached to a request.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON.
    Json(serde_json::Value),
    /// Sent as-is.
    Bytes(Bytes),
}

/// Everything needed to issue one attempt.
///
/// The retry coordinator reuses the same descriptor for every attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    pub method: Method,
    /// Fully resolved URL, query string included.
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
    pub timeout: Duration,
    /// When `false` the request is attempted once, whatever the retry policy.
    pub idempotent: bool,
}

impl RequestDescriptor {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
            timeout: Duration::from_secs(10),
            idempotent: true,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }
}

/// Per-call overrides of the client defaults.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RequestOptions {
    /// Merged over the default headers; same name wins.
    pub headers: BTreeMap<String, String>,
    /// `Some(0)` is ignored and the client timeout applies.
    pub timeout_ms: Option<u64>,
    pub retry_policy: Option<RetryPolicy>,
    /// Defaults to `true` for every method.
    pub idempotent: Option<bool>,
}

impl RequestOptions {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Marks the call as unsafe to repeat, so it is attempted once.
    pub fn non_idempotent(mut self) -> Self {
        self.idempotent = Some(false);
        self
    }
}

/// Resolves `url` against `base_url`.
///
/// Absolute `http(s)` URLs are returned unchanged; anything else is joined
/// with exactly one `/` between base and path.
pub fn resolve_url(base_url: &str, url: &str) -> String {
    if is_absolute(url) || base_url.is_empty() {
        return url.to_owned();
    }
    let base = base_url.trim_end_matches('/');
    let path = url.trim_start_matches('/');
    if path.is_empty() {
        return base.to_owned();
    }
    format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
    use reqwest::Method;

    use super::{resolve_url, RequestDescriptor};

    #[test]
    fn absolute_urls_are_kept() {
        assert_eq!(
            resolve_url("https://api.example.com", "http://other.host/x"),
            "http://other.host/x"
        );
        assert_eq!(
            resolve_url("https://api.example.com", "HTTPS://other.host/x"),
            "HTTPS://other.host/x"
        );
    }

    #[test]
    fn relative_urls_join_with_single_slash() {
        assert_eq!(
            resolve_url("https://api.example.com/v1/", "/prices"),
            "https://api.example.com/v1/prices"
        );
        assert_eq!(
            resolve_url("https://api.example.com/v1", "prices"),
            "https://api.example.com/v1/prices"
        );
    }

    #[test]
    fn empty_base_leaves_url_alone() {
        assert_eq!(resolve_url("", "/prices"), "/prices");
    }

    #[test]
    fn descriptor_is_idempotent_by_default() {
        let descriptor = RequestDescriptor::new(Method::POST, "https://api.example.com/predict");
        assert!(descriptor.idempotent);
        assert!(!descriptor.idempotent(false).idempotent);
    }
}
