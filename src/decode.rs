use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::{ApiError, Result};

/// A 2xx response as read off the wire, before decoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    /// Value of the `Content-Type` header, if any.
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, content_type: Option<&str>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_owned),
            body: body.into(),
        }
    }
}

/// Declared kind of a response body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentKind {
    Json,
    Text,
    Binary,
    Unknown,
}

impl ContentKind {
    /// Classifies a `Content-Type` header value. Parameters such as
    /// `charset` are ignored.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(raw) = content_type else {
            return Self::Unknown;
        };
        let mime = raw
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        if mime == "application/json" || mime.ends_with("+json") {
            Self::Json
        } else if mime.starts_with("text/") || mime == "application/xml" || mime.ends_with("+xml") {
            Self::Text
        } else if mime == "application/octet-stream"
            || mime == "application/pdf"
            || mime == "application/zip"
            || mime.starts_with("image/")
            || mime.starts_with("audio/")
            || mime.starts_with("video/")
        {
            Self::Binary
        } else {
            Self::Unknown
        }
    }
}

/// Decoded response body.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
    Binary(Bytes),
}

impl Payload {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Deserializes a JSON payload into `T`.
    pub fn into_json<T: DeserializeOwned>(self) -> Result<T> {
        match self {
            Payload::Json(value) => serde_json::from_value(value)
                .map_err(|err| ApiError::Decode(format!("unexpected payload shape: {err}"))),
            Payload::Text(_) => Err(ApiError::Decode("expected JSON payload, got text".to_owned())),
            Payload::Binary(_) => Err(ApiError::Decode(
                "expected JSON payload, got binary".to_owned(),
            )),
        }
    }
}

/// Decodes a successful response according to its declared content kind.
///
/// Only a declared JSON body can fail. An undeclared body is parsed as JSON
/// when possible and returned as text otherwise.
pub fn decode(raw: RawResponse) -> Result<Payload> {
    match ContentKind::from_content_type(raw.content_type.as_deref()) {
        ContentKind::Json => parse_json(&raw.body).map(Payload::Json).map_err(|err| {
            ApiError::Decode(format!(
                "invalid JSON response: {err}; body: {}",
                String::from_utf8_lossy(&raw.body)
            ))
        }),
        ContentKind::Text => Ok(Payload::Text(lossy_text(raw.body))),
        ContentKind::Binary => Ok(Payload::Binary(raw.body)),
        ContentKind::Unknown => match parse_json(&raw.body) {
            Ok(value) => Ok(Payload::Json(value)),
            Err(_) => Ok(Payload::Text(lossy_text(raw.body))),
        },
    }
}

fn parse_json(body: &[u8]) -> std::result::Result<serde_json::Value, serde_json::Error> {
    serde_json::from_slice(body)
}

fn lossy_text(body: Bytes) -> String {
    String::from_utf8_lossy(&body).into_owned()
}
