use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Serialize;

use crate::{
    cache::{KeyValueStore, ResponseCache},
    decode::Payload,
    query::{append_query, Query},
    request::{resolve_url, RequestBody, RequestDescriptor, RequestOptions},
    retry::RetryCoordinator,
    transport::{HttpTransport, Transport},
    upload::{Upload, UploadChannel, UploadFile},
    ApiError, ClientOptions, Result, RetryPolicy,
};

#[derive(Clone)]
/// HTTP client for a prediction/data service.
///
/// Cloning is cheap; clones share the transport and the response cache.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    uploads: UploadChannel,
    cache: ResponseCache,
    /// Set once the cache may be seen by clients with another base URL.
    shared_cache: bool,
    options: ClientOptions,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<&str> = self
            .options
            .default_headers
            .keys()
            .map(String::as_str)
            .collect();
        f.debug_struct("ApiClient")
            .field("base_url", &self.options.base_url)
            .field("default_timeout_ms", &self.options.default_timeout_ms)
            .field("retry_policy", &self.options.retry_policy)
            .field("default_headers", &header_names)
            .field("cache_ttl_ms", &self.options.cache_ttl_ms)
            .finish()
    }
}

impl ApiClient {
    /// Creates a client after validating `options`.
    pub fn new(options: ClientOptions) -> Result<Self> {
        options.validate()?;
        let transport = HttpTransport::new();
        Ok(Self {
            uploads: UploadChannel::new(transport.client().clone()),
            transport: Arc::new(transport),
            cache: ResponseCache::default(),
            shared_cache: false,
            options,
        })
    }

    /// Creates a client from `PREDICT_API_*` environment variables.
    ///
    /// See [`ClientOptions::from_env`] for the variables read.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use predict_http::ApiClient;
    ///
    /// let api = ApiClient::from_env().expect("missing PREDICT_API_BASE_URL");
    /// ```
    pub fn from_env() -> Result<Self> {
        Self::new(ClientOptions::from_env()?)
    }

    /// Sends attempts through `transport` instead of the default `reqwest` one.
    /// Uploads keep using the `reqwest` client.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Uses a preconfigured `reqwest` client for requests and uploads.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.uploads = UploadChannel::new(http.clone());
        self.transport = Arc::new(HttpTransport::from_client(http));
        self
    }

    /// Backs `cached_get` with `store` instead of a private in-memory one.
    ///
    /// Keys written to `store` include the base URL.
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.cache = ResponseCache::new(store);
        self.shared_cache = true;
        self
    }

    /// Shares an existing cache, e.g. between clients of different services.
    ///
    /// Keys written to a shared cache include the base URL, so clients with
    /// different base URLs never see each other's entries.
    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self.shared_cache = true;
        self
    }

    /// Sends `Authorization: Bearer <token>` with every request.
    ///
    /// If the token is missing the `Bearer ` prefix, it is added automatically.
    pub fn with_bearer_token(mut self, token: impl AsRef<str>) -> Self {
        self.options.default_headers.insert(
            "Authorization".to_owned(),
            normalize_bearer_authorization(token.as_ref()),
        );
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// GET `url` with query `params`.
    pub async fn get(&self, url: &str, params: impl Into<Query>) -> Result<Payload> {
        self.send(Method::GET, url, params, None, &RequestOptions::default())
            .await
    }

    /// POST `body` as JSON.
    pub async fn post<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Payload> {
        let body = to_json(body)?;
        self.send(Method::POST, url, (), Some(body), &RequestOptions::default())
            .await
    }

    /// PUT `body` as JSON.
    pub async fn put<B: Serialize + ?Sized>(&self, url: &str, body: &B) -> Result<Payload> {
        let body = to_json(body)?;
        self.send(Method::PUT, url, (), Some(body), &RequestOptions::default())
            .await
    }

    pub async fn delete(&self, url: &str) -> Result<Payload> {
        self.send(Method::DELETE, url, (), None, &RequestOptions::default())
            .await
    }

    /// Sends a request with every per-call option available.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        params: impl Into<Query>,
        body: Option<serde_json::Value>,
        options: &RequestOptions,
    ) -> Result<Payload> {
        let mut request = self.prepare(method, url, &params.into(), options);
        request.body = body.map(RequestBody::Json);
        let policy = options.retry_policy.unwrap_or(self.options.retry_policy);
        self.execute(&request, policy).await
    }

    /// Runs a prepared descriptor through the retry coordinator.
    pub async fn execute(
        &self,
        request: &RequestDescriptor,
        policy: RetryPolicy,
    ) -> Result<Payload> {
        RetryCoordinator::new(self.transport.as_ref())
            .execute(request, policy)
            .await
    }

    /// Builds a descriptor with the client defaults and `options` applied.
    pub fn prepare(
        &self,
        method: Method,
        url: &str,
        params: &Query,
        options: &RequestOptions,
    ) -> RequestDescriptor {
        let mut headers = self.options.default_headers.clone();
        for (name, value) in &options.headers {
            headers.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
            headers.insert(name.clone(), value.clone());
        }

        RequestDescriptor {
            method,
            url: append_query(&resolve_url(&self.options.base_url, url), params),
            headers,
            body: None,
            timeout: options
                .timeout_ms
                .filter(|timeout_ms| *timeout_ms > 0)
                .map(Duration::from_millis)
                .unwrap_or_else(|| self.options.default_timeout()),
            idempotent: options.idempotent.unwrap_or(true),
        }
    }

    /// GET through the response cache.
    ///
    /// The cache key is `url` plus its query string. With a private cache the
    /// base URL is left out; with a shared one ([`ApiClient::with_cache`],
    /// [`ApiClient::with_store`]) the fully resolved URL is used.
    /// `ttl` defaults to [`ClientOptions::cache_ttl_ms`].
    pub async fn cached_get(
        &self,
        url: &str,
        params: impl Into<Query>,
        ttl: Option<Duration>,
    ) -> Result<Payload> {
        let params = params.into();
        let ttl = ttl.unwrap_or_else(|| self.options.cache_ttl());
        let request = self.prepare(Method::GET, url, &params, &RequestOptions::default());
        let key = if self.shared_cache {
            request.url.clone()
        } else {
            append_query(url, &params)
        };
        let policy = self.options.retry_policy;
        let request = &request;

        self.cache
            .get_or_fetch(&key, ttl, move || self.execute(request, policy))
            .await
    }

    /// Removes cached responses whose key starts with `prefix`, or all of them.
    pub fn clear_cache(&self, prefix: Option<&str>) {
        self.cache.clear(prefix);
    }

    /// Starts a multipart upload and returns its event stream.
    ///
    /// Uploads are attempted once.
    pub fn upload<K, V>(
        &self,
        url: &str,
        file: UploadFile,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Upload
    where
        K: Into<String>,
        V: Into<String>,
    {
        let request = self
            .prepare(Method::POST, url, &Query::new(), &RequestOptions::default())
            .idempotent(false);
        let fields = fields
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        self.uploads.upload(request, file, fields)
    }

    /// Uploads `file` and returns the decoded response.
    pub async fn upload_file<K, V>(
        &self,
        url: &str,
        file: UploadFile,
        fields: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Payload>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.upload(url, file, fields).finish(|_| {}).await
    }

    /// Uploads `file`, calling `on_progress` with each new percentage.
    pub async fn upload_file_with_progress<K, V>(
        &self,
        url: &str,
        file: UploadFile,
        fields: impl IntoIterator<Item = (K, V)>,
        on_progress: impl FnMut(u8),
    ) -> Result<Payload>
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.upload(url, file, fields).finish(on_progress).await
    }
}

fn to_json<B: Serialize + ?Sized>(body: &B) -> Result<serde_json::Value> {
    serde_json::to_value(body)
        .map_err(|err| ApiError::InvalidRequest(format!("body is not serializable: {err}")))
}

fn normalize_bearer_authorization(token: &str) -> String {
    let trimmed = token.trim();
    let prefix = trimmed.get(..7);
    if prefix.is_some_and(|value| value.eq_ignore_ascii_case("bearer ")) {
        trimmed.to_owned()
    } else {
        format!("Bearer {trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::Method;

    use super::{normalize_bearer_authorization, ApiClient};
    use crate::{
        ApiError, ClientOptions, Payload, Query, RawResponse, RequestDescriptor, RequestOptions,
        ResponseCache, Result, RetryPolicy, Transport,
    };

    fn client() -> ApiClient {
        ApiClient::new(ClientOptions::with_base_url("https://api.example.com/v1")).unwrap()
    }

    #[test]
    fn normalize_bearer_adds_prefix_when_missing() {
        assert_eq!(
            normalize_bearer_authorization("abc123"),
            "Bearer abc123".to_owned()
        );
    }

    #[test]
    fn normalize_bearer_keeps_existing_prefix() {
        assert_eq!(
            normalize_bearer_authorization("bEaReR abc123"),
            "bEaReR abc123".to_owned()
        );
    }

    #[test]
    fn debug_redacts_header_values() {
        let client = client().with_bearer_token("secret-token");
        let debug = format!("{client:?}");
        assert!(debug.contains("Authorization"));
        assert!(!debug.contains("secret-token"));
    }

    #[test]
    fn new_rejects_invalid_options() {
        let mut options = ClientOptions::default();
        options.retry_policy = RetryPolicy::new(0, 0);
        assert!(matches!(ApiClient::new(options), Err(ApiError::Config(_))));
    }

    #[test]
    fn prepare_applies_defaults_and_overrides() {
        let options = RequestOptions::default()
            .header("content-type", "text/csv")
            .timeout_ms(250)
            .non_idempotent();
        let request = client().prepare(
            Method::POST,
            "/prices",
            &Query::new().with("crop", "wheat"),
            &options,
        );

        assert_eq!(request.url, "https://api.example.com/v1/prices?crop=wheat");
        assert_eq!(request.timeout, Duration::from_millis(250));
        assert!(!request.idempotent);
        assert_eq!(request.headers.len(), 1);
        assert_eq!(
            request.headers.get("content-type").map(String::as_str),
            Some("text/csv")
        );
    }

    #[test]
    fn prepare_uses_client_timeout_by_default() {
        let request = client().prepare(
            Method::GET,
            "https://elsewhere.example.com/x",
            &Query::new(),
            &RequestOptions::default(),
        );
        assert_eq!(request.url, "https://elsewhere.example.com/x");
        assert_eq!(request.timeout, Duration::from_millis(10_000));
        assert!(request.idempotent);
    }

    #[test]
    fn prepare_ignores_zero_timeout_override() {
        let request = client().prepare(
            Method::GET,
            "/prices",
            &Query::new(),
            &RequestOptions::default().timeout_ms(0),
        );
        assert_eq!(request.timeout, Duration::from_millis(10_000));
    }

    /// Answers every attempt with a fixed text body.
    struct FixedTransport {
        body: &'static str,
        calls: AtomicUsize,
    }

    impl FixedTransport {
        fn new(body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                body,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn attempt(&self, _request: &RequestDescriptor) -> Result<RawResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RawResponse::new(200, Some("text/plain"), self.body))
        }
    }

    fn client_for(base_url: &str, transport: Arc<FixedTransport>) -> ApiClient {
        ApiClient::new(ClientOptions::with_base_url(base_url))
            .unwrap()
            .with_transport(transport)
    }

    #[tokio::test]
    async fn shared_cache_keeps_base_urls_apart() {
        let cache = ResponseCache::default();
        let weather = FixedTransport::new("weather");
        let market = FixedTransport::new("market");
        let a = client_for("https://weather.example.com", weather.clone())
            .with_cache(cache.clone());
        let b = client_for("https://market.example.com", market.clone())
            .with_cache(cache.clone());

        let from_a = a.cached_get("/prices", (), None).await.unwrap();
        let from_b = b.cached_get("/prices", (), None).await.unwrap();
        let again_b = b.cached_get("/prices", (), None).await.unwrap();

        assert_eq!(from_a, Payload::Text("weather".to_owned()));
        assert_eq!(from_b, Payload::Text("market".to_owned()));
        assert_eq!(again_b, Payload::Text("market".to_owned()));
        assert_eq!(weather.calls(), 1);
        assert_eq!(market.calls(), 1);
        assert!(cache
            .store()
            .get("https://market.example.com/prices")
            .is_some());
    }

    #[tokio::test]
    async fn private_cache_keys_leave_out_base_url() {
        let transport = FixedTransport::new("prices");
        let api = client_for("https://market.example.com", transport.clone());

        api.cached_get("/prices", Query::new().with("crop", "wheat"), None)
            .await
            .unwrap();

        assert!(api.cache().store().get("/prices?crop=wheat").is_some());
    }

    #[tokio::test]
    async fn cached_get_accepts_unbounded_ttl() {
        let transport = FixedTransport::new("forever");
        let api = client_for("https://market.example.com", transport.clone());

        api.cached_get("/forever", Query::new(), Some(Duration::MAX))
            .await
            .unwrap();
        api.cached_get("/forever", Query::new(), Some(Duration::MAX))
            .await
            .unwrap();

        assert_eq!(transport.calls(), 1);
    }
}
