use base64::{prelude::BASE64_STANDARD, Engine};
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use hyper::body::Incoming;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex},
};
use streamline_api_client::{
    body::{Body, Sender},
    BoxError, Client,
};
use tokio::task::JoinHandle;
use tracing::{error, warn};

use crate::{
    diagnostic::Diagnostic,
    requests::{EventStreamRequest, IntoRequest},
    Error,
};

/// Eight NUL bytes separating the prelude document from the response body.
pub(crate) const PRELUDE_SEPARATOR: [u8; 8] = [0; 8];

/// The status code and headers prefixed to a streamed response body.
///
/// When written, the document is JSON encoded and separated from the body
/// bytes by eight NUL bytes. Header names pass through as given; one value
/// per name.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataPrelude {
    /// The HTTP status code of the response, serialized as a number.
    #[serde(with = "http_serde::status_code")]
    pub status_code: StatusCode,
    /// Response headers, omitted from the document when empty.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Default for MetadataPrelude {
    fn default() -> Self {
        MetadataPrelude {
            status_code: StatusCode::OK,
            headers: BTreeMap::new(),
        }
    }
}

impl MetadataPrelude {
    /// Create a prelude with the given status code and no headers.
    pub fn new(status_code: StatusCode) -> Self {
        MetadataPrelude {
            status_code,
            ..Default::default()
        }
    }

    /// Add a response header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// How the accumulated response leaves the process.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum ResponseMode {
    /// Writes accumulate and are posted in one piece with a Content-Length.
    Buffered,
    /// Each write flushes a chunk of an already-open chunked POST.
    Streamed,
}

/// Linear per-invocation state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum WriterState {
    Fresh,
    HeadersWritten,
    BodyOpen,
    Finished,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
enum Fault {
    DoubleFinish,
    InvalidState(&'static str),
}

impl Fault {
    fn error_type(&self) -> &'static str {
        match self {
            Fault::DoubleFinish => "Runtime.DoubleFinish",
            Fault::InvalidState(_) => "Runtime.InvalidStreamState",
        }
    }

    fn diagnostic(&self) -> Diagnostic {
        Diagnostic::new(self.error_type(), self.to_string())
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::DoubleFinish => write!(f, "finish was called more than once on the response writer"),
            Fault::InvalidState(op) => write!(f, "{op} is not valid in the writer's current state"),
        }
    }
}

impl std::error::Error for Fault {}

type PostHandle = JoinHandle<Result<http::Response<Incoming>, BoxError>>;

struct WriterInner {
    state: WriterState,
    mode: ResponseMode,
    buffer: BytesMut,
    tx: Option<Sender>,
    post: Option<PostHandle>,
    /// Bytes have reached the wire; errors from here on must be trailers.
    opened: bool,
    fault: Option<Diagnostic>,
}

/// Writer for the outbound body of one invocation.
///
/// The writer is handed to streaming handlers by value; the runtime keeps a
/// clone and reclaims the shared state once the handler returns, so misuse
/// is reported to the Runtime API even when the handler ignores the errors
/// returned here.
///
/// Operations follow a linear state machine: an optional
/// [`write_status_and_headers`][Self::write_status_and_headers], then any
/// number of [`write`][Self::write] calls, then exactly one
/// [`finish`][Self::finish].
#[derive(Clone)]
pub struct ResponseWriter {
    client: Client,
    request_id: Arc<str>,
    inner: Arc<Mutex<WriterInner>>,
}

impl fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

impl ResponseWriter {
    pub(crate) fn new(client: Client, request_id: &str, mode: ResponseMode) -> Self {
        ResponseWriter {
            client,
            request_id: Arc::from(request_id),
            inner: Arc::new(Mutex::new(WriterInner {
                state: WriterState::Fresh,
                mode,
                buffer: BytesMut::new(),
                tx: None,
                post: None,
                opened: false,
                fault: None,
            })),
        }
    }

    /// Write the status code and headers of the response.
    ///
    /// Valid only before any body byte; at most once per invocation.
    pub async fn write_status_and_headers(&self, prelude: MetadataPrelude) -> Result<(), Error> {
        let document = serde_json::to_vec(&prelude)?;
        let tx = {
            let mut inner = self.lock();
            if inner.state != WriterState::Fresh {
                return Err(self.record_fault(&mut inner, Fault::InvalidState("write_status_and_headers")));
            }
            inner.state = WriterState::HeadersWritten;
            match inner.mode {
                ResponseMode::Buffered => {
                    inner.buffer.extend_from_slice(&document);
                    inner.buffer.extend_from_slice(&PRELUDE_SEPARATOR);
                    None
                }
                ResponseMode::Streamed => {
                    inner.opened = true;
                    Some(self.open_stream(&mut inner)?)
                }
            }
        };
        if let Some(tx) = tx {
            tx.send_data(document.into()).await?;
            tx.send_data(Bytes::from_static(&PRELUDE_SEPARATOR)).await?;
        }
        Ok(())
    }

    /// Append bytes to the response body.
    ///
    /// In streamed mode every call flushes one chunk, waiting for channel
    /// capacity; in buffered mode calls accumulate until the handler
    /// returns.
    pub async fn write(&self, chunk: impl Into<Bytes>) -> Result<(), Error> {
        let chunk = chunk.into();
        let tx = {
            let mut inner = self.lock();
            match inner.state {
                WriterState::Fresh | WriterState::HeadersWritten | WriterState::BodyOpen => {}
                WriterState::Finished => {
                    return Err(self.record_fault(&mut inner, Fault::InvalidState("write")));
                }
            }
            inner.state = WriterState::BodyOpen;
            match inner.mode {
                ResponseMode::Buffered => {
                    inner.buffer.extend_from_slice(&chunk);
                    None
                }
                ResponseMode::Streamed => {
                    inner.opened = true;
                    Some(self.open_stream(&mut inner)?)
                }
            }
        };
        if let Some(tx) = tx {
            tx.send_data(chunk).await?;
        }
        Ok(())
    }

    /// Close the response body. Must be called exactly once.
    ///
    /// The underlying stream is released when control returns to the
    /// runtime, so a violation detected after `finish` can still be
    /// reported on the open response.
    pub fn finish(&self) -> Result<(), Error> {
        let mut inner = self.lock();
        if inner.state == WriterState::Finished {
            return Err(self.record_fault(&mut inner, Fault::DoubleFinish));
        }
        inner.state = WriterState::Finished;
        Ok(())
    }

    /// Write a final chunk and close the response body.
    pub async fn write_and_finish(&self, chunk: impl Into<Bytes>) -> Result<(), Error> {
        self.write(chunk).await?;
        self.finish()
    }

    /// Report an error for this invocation.
    ///
    /// If body bytes are already on the wire the error is emitted as a
    /// trailer on the open stream; otherwise the runtime converts it into an
    /// error report POST. Either way the writer is closed.
    pub async fn report_error(&self, diagnostic: impl Into<Diagnostic>) -> Result<(), Error> {
        let diagnostic = diagnostic.into();
        let tx = {
            let mut inner = self.lock();
            if inner.fault.is_none() {
                inner.fault = Some(diagnostic.clone());
            }
            inner.state = WriterState::Finished;
            if inner.opened {
                inner.tx.take()
            } else {
                None
            }
        };
        if let Some(tx) = tx {
            if tx.send_trailers(error_trailers(&diagnostic)).await.is_err() {
                warn!(request_id = %self.request_id, "response stream closed before the error trailer was sent");
            }
        }
        Ok(())
    }

    /// Open the chunked POST and return a sender for its body.
    fn open_stream(&self, inner: &mut WriterInner) -> Result<Sender, Error> {
        if inner.tx.is_none() {
            let (tx, body) = Body::channel();
            let req = EventStreamRequest {
                request_id: &self.request_id,
                body,
            }
            .into_req()?;
            inner.post = Some(tokio::spawn(self.client.call(req)));
            inner.tx = Some(tx);
        }
        Ok(inner.tx.clone().ok_or("stream sender is gone")?)
    }

    fn record_fault(&self, inner: &mut WriterInner, fault: Fault) -> Error {
        if inner.fault.is_none() {
            inner.fault = Some(fault.diagnostic());
        }
        Box::new(fault)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WriterInner> {
        // The writer is never locked across an await, so the lock can only
        // be poisoned by a panicking peer; propagate the panic.
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Resolve the invocation's terminal report after the handler returned.
    ///
    /// Consumes the shared state: trailer errors are emitted here, open
    /// streams are closed, and the caller is told which terminal POST (if
    /// any) is still owed to the Runtime API.
    pub(crate) async fn complete(&self, handler_error: Option<Diagnostic>) -> Result<Completion, Error> {
        let (finished, opened, fault, buffer, tx, post) = {
            let mut inner = self.lock();
            (
                inner.state == WriterState::Finished,
                inner.opened,
                inner.fault.take(),
                std::mem::take(&mut inner.buffer),
                inner.tx.take(),
                inner.post.take(),
            )
        };

        // A recorded fault wins over the handler's returned error: when a
        // contract violation propagates out of the handler both describe the
        // same failure, and the fault carries the precise class.
        let error = fault.or(handler_error);

        if error.is_none() && !finished {
            warn!(request_id = %self.request_id, "handler returned without finishing the response writer");
        }

        let completion = match error {
            Some(diagnostic) if opened => {
                if let Some(tx) = &tx {
                    if tx.send_trailers(error_trailers(&diagnostic)).await.is_err() {
                        warn!(request_id = %self.request_id, "response stream closed before the error trailer was sent");
                    }
                }
                Completion::Streamed
            }
            Some(diagnostic) => Completion::RespondError(diagnostic),
            None if opened => Completion::Streamed,
            // An unwritten streamed response reports like a buffered one:
            // the (possibly empty) accumulated bytes go out in one POST.
            None => Completion::Respond(buffer.freeze()),
        };

        // Close the body channel, then wait for the in-flight POST so the
        // report is on the wire before the next poll.
        drop(tx);
        if let Some(post) = post {
            match post.await {
                Ok(Ok(response)) if !response.status().is_success() => {
                    error!(
                        request_id = %self.request_id,
                        status = %response.status(),
                        "Runtime API rejected the streamed response"
                    );
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    error!(request_id = %self.request_id, error = %err, "failed to post the streamed response");
                }
                Err(err) => {
                    error!(request_id = %self.request_id, error = %err, "streamed response task failed");
                }
            }
        }

        Ok(completion)
    }
}

/// Terminal action still owed to the Runtime API for one invocation.
#[derive(Debug)]
pub(crate) enum Completion {
    /// POST the body to `invocation/{id}/response`.
    Respond(Bytes),
    /// POST the diagnostic to `invocation/{id}/error`.
    RespondError(Diagnostic),
    /// The streamed POST already carried the response (or its trailer
    /// error); nothing left to send.
    Streamed,
}

fn error_trailers(diagnostic: &Diagnostic) -> HeaderMap {
    let mut trailers = HeaderMap::new();
    let error_type = diagnostic
        .error_type
        .parse()
        .unwrap_or_else(|_| http::HeaderValue::from_static("Runtime.UnknownError"));
    trailers.insert("Lambda-Runtime-Function-Error-Type", error_type);
    let body = serde_json::to_vec(diagnostic).unwrap_or_default();
    if let Ok(value) = BASE64_STANDARD.encode(body).parse() {
        trailers.insert("Lambda-Runtime-Function-Error-Body", value);
    }
    trailers
}
