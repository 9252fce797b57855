#![deny(clippy::all, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]
#![warn(missing_docs, nonstandard_style, rust_2018_idioms)]

//! Streamline is a streaming-first custom runtime for AWS Lambda.
//!
//! The runtime polls the [Lambda Runtime
//! API](https://docs.aws.amazon.com/lambda/latest/dg/runtimes-api.html) for
//! invocations, hands each one to your handler, and reports the result back
//! — either buffered in one piece, or streamed chunk by chunk with an
//! optional status-and-headers prelude.
//!
//! A handler is constructed once per execution environment by an
//! asynchronous factory (the cold start) and reused for every invocation
//! after that. Three handler shapes are available, each with a closure
//! based constructor:
//!
//! - [`handler_fn`]: buffered, from event bytes to response bytes;
//! - [`streaming_handler_fn`]: writes its response to a [`ResponseWriter`];
//! - [`streaming_codable_fn`]: like the above, but receives a decoded
//!   event, transparently extracted from Function URL and API Gateway
//!   request envelopes.
//!
//! # Example
//! ```no_run
//! use bytes::Bytes;
//! use streamline_runtime::{handler_fn, Context, Error};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     streamline_runtime::run(|| async {
//!         Ok(handler_fn(|event: Bytes, _: Context| async move {
//!             Ok::<_, Error>(event)
//!         }))
//!     })
//!     .await
//! }
//! ```
//!
//! Set `LOCAL_LAMBDA_SERVER_ENABLED=true` to run against the built-in
//! [local invocation server][LocalServer] instead of a real Runtime API
//! endpoint, and `POST` events to its `/invoke` endpoint.

use std::future::Future;

mod codable;
mod config;
mod context;
mod diagnostic;
mod envelope;
mod handler;
#[cfg(feature = "local-server")]
mod local_server;
mod requests;
mod runtime;
mod streaming;

pub use codable::{
    codable_fn, codable_unit_fn, streaming_codable_fn, CodableHandler, Decoder, DeserializeError, Encoder,
    JsonDecoder, JsonEncoder, StreamingCodableHandler, UnitEncoder,
};
pub use config::{Config, PayloadMode};
pub use context::Context;
pub use diagnostic::Diagnostic;
pub use envelope::{ApiGatewayProxyRequest, FunctionUrlRequest, InboundEnvelope};
pub use handler::{
    handler_fn, streaming_handler_fn, typed_streaming_handler_fn, Handler, HandlerFn, StreamingHandler,
    StreamingHandlerFn, TypedStreamingHandler, TypedStreamingHandlerFn,
};
#[cfg(feature = "local-server")]
pub use local_server::LocalServer;
pub use runtime::{Runtime, RuntimeBuilder};
pub use streaming::{MetadataPrelude, ResponseWriter};

#[cfg(feature = "tracing")]
pub use streamline_api_client::tracing;

/// Error type that the runtime and handlers may result in.
pub type Error = streamline_api_client::BoxError;

/// Starts the runtime with a buffered handler, reading the configuration
/// from the environment.
///
/// The factory runs exactly once, at cold start. If it fails, the error is
/// reported to `init/error` and this function returns it, so propagating
/// the result from `main` terminates the process with a non-zero status —
/// which is what makes the Lambda host tear down the sandbox.
pub async fn run<F, Fut, H>(factory: F) -> Result<(), Error>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<H, Error>>,
    H: Handler,
    H::Fut: Send + 'static,
    H::Error: Send,
{
    Runtime::builder().build()?.run(factory).await
}

/// Starts the runtime with a streaming handler.
///
/// Same lifecycle as [`run`], but the handler receives a
/// [`ResponseWriter`]: every write flushes a chunk of the response while
/// the invocation is still in flight, and
/// [`write_status_and_headers`][ResponseWriter::write_status_and_headers]
/// can prefix the body with an HTTP status and headers.
pub async fn run_with_streaming_response<F, Fut, H>(factory: F) -> Result<(), Error>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<H, Error>>,
    H: StreamingHandler,
{
    Runtime::builder().build()?.run_with_streaming_response(factory).await
}
