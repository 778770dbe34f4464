//! Multipart uploads that report progress while the body is sent.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{stream, Stream, StreamExt};
use parking_lot::Mutex;
use reqwest::multipart::{Form, Part};
use tokio::sync::mpsc;

use crate::{
    decode::{decode, Payload},
    request::RequestDescriptor,
    transport::{header_map, read_response},
    ApiError, Result,
};

const CHUNK_SIZE: usize = 64 * 1024;

/// A file to send as the `file` part of a multipart form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl UploadFile {
    pub fn new(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }
}

/// One item of an upload's event sequence.
#[derive(Clone, Debug, PartialEq)]
pub enum UploadEvent {
    /// Percentage of file bytes handed to the connection, 0–100.
    Progress(u8),
    Completed(Payload),
    Failed(ApiError),
}

impl UploadEvent {
    fn is_terminal(&self) -> bool {
        !matches!(self, UploadEvent::Progress(_))
    }
}

/// Upload in flight, read as a stream of [`UploadEvent`]s.
///
/// Progress values never decrease. The stream yields exactly one
/// `Completed` or `Failed` event and then ends. Nothing is sent until the
/// stream is first polled.
pub struct Upload {
    driver: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    events: mpsc::UnboundedReceiver<UploadEvent>,
    finished: bool,
}

impl Upload {
    /// Drives the upload to its end, passing each progress value to
    /// `on_progress`.
    pub async fn finish(mut self, mut on_progress: impl FnMut(u8)) -> Result<Payload> {
        while let Some(event) = self.next().await {
            match event {
                UploadEvent::Progress(percent) => on_progress(percent),
                UploadEvent::Completed(payload) => return Ok(payload),
                UploadEvent::Failed(err) => return Err(err),
            }
        }
        Err(ApiError::RequestFailed)
    }
}

impl Stream for Upload {
    type Item = UploadEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<UploadEvent>> {
        if self.finished {
            return Poll::Ready(None);
        }

        let driver_done = match self.driver.as_mut() {
            Some(driver) => driver.as_mut().poll(cx).is_ready(),
            None => false,
        };
        if driver_done {
            self.driver = None;
        }

        match self.events.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Sends multipart uploads over a `reqwest` client.
#[derive(Clone, Debug, Default)]
pub struct UploadChannel {
    http: reqwest::Client,
}

impl UploadChannel {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Prepares a single-attempt upload of `file` plus text `fields`.
    ///
    /// `request` supplies the method, URL, headers and timeout; its body is
    /// ignored. A `Content-Type` header is replaced by the multipart one.
    pub fn upload(
        &self,
        request: RequestDescriptor,
        file: UploadFile,
        fields: Vec<(String, String)>,
    ) -> Upload {
        let (sender, events) = mpsc::unbounded_channel();
        let sink = Arc::new(EventSink::new(sender));
        let http = self.http.clone();

        let driver = async move {
            let outcome = send_multipart(http, request, file, fields, sink.clone()).await;
            sink.finish(match outcome {
                Ok(payload) => UploadEvent::Completed(payload),
                Err(err) => UploadEvent::Failed(err),
            });
        };

        Upload {
            driver: Some(Box::pin(driver)),
            events,
            finished: false,
        }
    }
}

async fn send_multipart(
    http: reqwest::Client,
    request: RequestDescriptor,
    file: UploadFile,
    fields: Vec<(String, String)>,
    sink: Arc<EventSink>,
) -> Result<Payload> {
    let headers = request
        .headers
        .iter()
        .filter(|(name, _)| !name.eq_ignore_ascii_case("content-type"));
    let headers = header_map(headers)?;

    let total = file.bytes.len() as u64;
    let part = Part::stream_with_length(progress_body(file.bytes, sink), total)
        .file_name(file.file_name)
        .mime_str(&file.mime_type)
        .map_err(|err| ApiError::InvalidRequest(format!("invalid MIME type: {err}")))?;

    let mut form = Form::new();
    for (name, value) in fields {
        form = form.text(name, value);
    }
    let form = form.part("file", part);

    let builder = http
        .request(request.method.clone(), &request.url)
        .headers(headers)
        .multipart(form);

    #[cfg(feature = "tracing")]
    tracing::debug!(url = %request.url, bytes = total, "starting upload");

    let exchange = async {
        let response = builder.send().await.map_err(ApiError::from_reqwest)?;
        read_response(response).await
    };
    let raw = tokio::time::timeout(request.timeout, exchange)
        .await
        .map_err(|_| ApiError::Timeout)??;

    #[cfg(feature = "tracing")]
    tracing::debug!(url = %request.url, status = raw.status, "upload finished");

    decode(raw)
}

/// Splits `bytes` into chunks and reports progress as each one is taken.
fn progress_body(bytes: Bytes, sink: Arc<EventSink>) -> reqwest::Body {
    let total = bytes.len() as u64;
    let chunks: Vec<Bytes> = (0..bytes.len())
        .step_by(CHUNK_SIZE)
        .map(|start| bytes.slice(start..(start + CHUNK_SIZE).min(bytes.len())))
        .collect();

    let mut sent = 0u64;
    let body = stream::iter(chunks).map(move |chunk| {
        sent += chunk.len() as u64;
        sink.progress(percent(sent, total));
        Ok::<_, std::io::Error>(chunk)
    });
    reqwest::Body::wrap_stream(body)
}

fn percent(sent: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    u8::try_from(sent.saturating_mul(100) / total)
        .unwrap_or(100)
        .min(100)
}

struct SinkState {
    sender: Option<mpsc::UnboundedSender<UploadEvent>>,
    last_percent: Option<u8>,
}

/// Serializes progress and terminal events; closed by the terminal one.
struct EventSink {
    state: Mutex<SinkState>,
}

impl EventSink {
    fn new(sender: mpsc::UnboundedSender<UploadEvent>) -> Self {
        Self {
            state: Mutex::new(SinkState {
                sender: Some(sender),
                last_percent: None,
            }),
        }
    }

    fn progress(&self, percent: u8) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(sender) = state.sender.as_ref() else {
            return;
        };
        if state.last_percent.is_some_and(|last| percent <= last) {
            return;
        }
        state.last_percent = Some(percent);
        let _ = sender.send(UploadEvent::Progress(percent));
    }

    fn finish(&self, event: UploadEvent) {
        let sender = self.state.lock().sender.take();
        if let Some(sender) = sender {
            let _ = sender.send(event);
        }
    }
}
