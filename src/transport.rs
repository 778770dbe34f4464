use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::{
    decode::RawResponse,
    request::{RequestBody, RequestDescriptor},
    ApiError, Result,
};

/// Issues exactly one network attempt for a descriptor.
///
/// Ordinary HTTP and network conditions come back as a classified
/// [`ApiError`]; `Ok` always carries a 2xx response.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn attempt(&self, request: &RequestDescriptor) -> Result<RawResponse>;
}

/// [`Transport`] backed by a `reqwest` client.
#[derive(Clone, Debug, Default)]
pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing client, e.g. one configured with a proxy.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.http
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn attempt(&self, request: &RequestDescriptor) -> Result<RawResponse> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(header_map(&request.headers)?);

        builder = match &request.body {
            Some(RequestBody::Json(value)) => builder.json(value),
            Some(RequestBody::Bytes(bytes)) => builder.body(bytes.clone()),
            None => builder,
        };

        // The deadline covers both the response head and the body read; dropping
        // the in-flight future on expiry cancels the attempt.
        let exchange = async {
            let response = builder.send().await.map_err(ApiError::from_reqwest)?;
            read_response(response).await
        };
        tokio::time::timeout(request.timeout, exchange)
            .await
            .map_err(|_| ApiError::Timeout)?
    }
}

/// Reads the body and classifies the status.
pub(crate) async fn read_response(response: reqwest::Response) -> Result<RawResponse> {
    let status = response.status().as_u16();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    let body = response.bytes().await.map_err(ApiError::from_reqwest)?;

    if !(200..300).contains(&status) {
        return Err(ApiError::from_status(
            status,
            String::from_utf8_lossy(&body).into_owned(),
        ));
    }

    Ok(RawResponse {
        status,
        content_type,
        body,
    })
}

pub(crate) fn header_map<'a, I>(headers: I) -> Result<HeaderMap>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ApiError::InvalidRequest(format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ApiError::InvalidRequest(format!("invalid value for header '{name}'")))?;
        map.insert(name, value);
    }
    Ok(map)
}
