/// Error type returned by this crate.
///
/// Every failure of a request is classified into exactly one variant.
/// Only [`ApiError::Server`] and [`ApiError::Network`] are retried.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// 4xx response. Treated as a caller error and never retried.
    #[error("client error {status}: {body}")]
    Client { status: u16, body: String },
    /// Any other non-2xx response, including 5xx.
    #[error("server error {status}: {body}")]
    Server { status: u16, body: String },
    /// DNS, connect or other connectivity failure.
    #[error("network error: {0}")]
    Network(String),
    /// The per-attempt deadline elapsed before the response was read.
    #[error("request timed out")]
    Timeout,
    /// A response declared as structured data could not be parsed.
    #[error("decode error: {0}")]
    Decode(String),
    /// The request could not be built (bad URL, header, or body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Client options failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// No attempt ran, e.g. a policy allowing zero attempts.
    #[error("request failed")]
    RequestFailed,
}

impl ApiError {
    /// Whether another attempt may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Server { .. } | ApiError::Network(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout)
    }

    /// HTTP status code carried by [`ApiError::Client`] or [`ApiError::Server`].
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Client { status, .. } | ApiError::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn from_status(status: u16, body: String) -> Self {
        if (400..500).contains(&status) {
            ApiError::Client { status, body }
        } else {
            ApiError::Server { status, body }
        }
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_builder() {
            ApiError::InvalidRequest(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}
