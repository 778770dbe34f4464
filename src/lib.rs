//! `predict-http` is a resilient async HTTP client for prediction/data services.
//!
//! Requests go through a bounded, linear-backoff retry loop with a per-attempt
//! timeout, and successful responses are decoded by their declared content type:
//! - [`ApiClient::get`], [`ApiClient::post`], [`ApiClient::put`], [`ApiClient::delete`]
//! - [`ApiClient::cached_get`] for reads served from a time-bounded cache
//! - [`ApiClient::upload`] / [`ApiClient::upload_file`] for multipart uploads
//!   with progress events
//!
//! ```no_run
//! use predict_http::{ApiClient, ClientOptions, Query};
//!
//! # async fn run() -> predict_http::Result<()> {
//! let api = ApiClient::new(ClientOptions::with_base_url("https://api.example.com/v1"))?;
//! let prices = api
//!     .cached_get("/prices", Query::new().with("crop", "wheat").with("state", "UP"), None)
//!     .await?;
//! println!("{:?}", prices.as_json());
//! # Ok(())
//! # }
//! ```

mod cache;
mod client;
mod decode;
mod error;
mod options;
mod query;
mod request;
mod retry;
mod transport;
mod upload;

pub use cache::{KeyValueStore, MemoryStore, ResponseCache};
pub use client::ApiClient;
pub use decode::{decode, ContentKind, Payload, RawResponse};
pub use error::ApiError;
pub use options::{ClientOptions, RetryPolicy};
pub use query::{build_query_string, Query, QueryValue};
pub use request::{resolve_url, RequestBody, RequestDescriptor, RequestOptions};
pub use retry::RetryCoordinator;
pub use transport::{HttpTransport, Transport};
pub use upload::{Upload, UploadChannel, UploadEvent, UploadFile};

pub use reqwest::Method;

pub type Result<T> = std::result::Result<T, ApiError>;
