use bytes::Bytes;
use std::{fmt::Debug, future::Future, pin::Pin};

use crate::{diagnostic::Diagnostic, streaming::ResponseWriter, Context};

/// A buffered handler: an asynchronous function from event bytes to
/// response bytes. The result is reported to the Runtime API in one piece.
pub trait Handler {
    /// Errors returned by this handler.
    type Error: Into<Diagnostic> + Debug;
    /// Response future of this handler.
    type Fut: Future<Output = Result<Bytes, Self::Error>>;
    /// Handle the incoming event.
    fn call(&self, event: Bytes, context: Context) -> Self::Fut;
}

/// A streaming handler: writes its response to a [`ResponseWriter`],
/// suspending between writes as it pleases.
///
/// Errors returned before the first write become error report POSTs;
/// errors returned after bytes are on the wire become stream trailers.
pub trait StreamingHandler {
    /// Errors returned by this handler.
    type Error: Into<Diagnostic> + Debug;
    /// Response future of this handler.
    type Fut: Future<Output = Result<(), Self::Error>>;
    /// Handle the incoming event, writing the response to `writer`.
    fn call(&self, event: Bytes, writer: ResponseWriter, context: Context) -> Self::Fut;
}

/// A streaming handler that receives a decoded event instead of raw bytes.
///
/// Wrapped by [`StreamingCodableHandler`][crate::codable::StreamingCodableHandler],
/// which decodes `T` out of the invocation payload — transparently reaching
/// through HTTP proxy envelopes — before calling the handler.
pub trait TypedStreamingHandler<T> {
    /// Errors returned by this handler.
    type Error: Into<Diagnostic> + Debug;
    /// Response future of this handler.
    type Fut: Future<Output = Result<(), Self::Error>>;
    /// Handle the decoded event, writing the response to `writer`.
    fn call(&self, event: T, writer: ResponseWriter, context: Context) -> Self::Fut;
}

/// Returns a new [`HandlerFn`] with the given closure.
pub fn handler_fn<F>(f: F) -> HandlerFn<F> {
    HandlerFn { f }
}

/// A [`Handler`] implemented by a closure.
#[derive(Clone, Debug)]
pub struct HandlerFn<F> {
    f: F,
}

impl<F, Fut, Err> Handler for HandlerFn<F>
where
    F: Fn(Bytes, Context) -> Fut,
    Fut: Future<Output = Result<Bytes, Err>>,
    Err: Into<Diagnostic> + Debug,
{
    type Error = Err;
    type Fut = Fut;

    fn call(&self, event: Bytes, context: Context) -> Self::Fut {
        (self.f)(event, context)
    }
}

/// Returns a new [`StreamingHandlerFn`] with the given closure.
pub fn streaming_handler_fn<F>(f: F) -> StreamingHandlerFn<F> {
    StreamingHandlerFn { f }
}

/// A [`StreamingHandler`] implemented by a closure.
#[derive(Clone, Debug)]
pub struct StreamingHandlerFn<F> {
    f: F,
}

impl<F, Fut, Err> StreamingHandler for StreamingHandlerFn<F>
where
    F: Fn(Bytes, ResponseWriter, Context) -> Fut,
    Fut: Future<Output = Result<(), Err>>,
    Err: Into<Diagnostic> + Debug,
{
    type Error = Err;
    type Fut = Fut;

    fn call(&self, event: Bytes, writer: ResponseWriter, context: Context) -> Self::Fut {
        (self.f)(event, writer, context)
    }
}

/// Returns a new [`TypedStreamingHandlerFn`] with the given closure.
pub fn typed_streaming_handler_fn<F>(f: F) -> TypedStreamingHandlerFn<F> {
    TypedStreamingHandlerFn { f }
}

/// A [`TypedStreamingHandler`] implemented by a closure.
#[derive(Clone, Debug)]
pub struct TypedStreamingHandlerFn<F> {
    f: F,
}

impl<F, T, Fut, Err> TypedStreamingHandler<T> for TypedStreamingHandlerFn<F>
where
    F: Fn(T, ResponseWriter, Context) -> Fut,
    Fut: Future<Output = Result<(), Err>>,
    Err: Into<Diagnostic> + Debug,
{
    type Error = Err;
    type Fut = Fut;

    fn call(&self, event: T, writer: ResponseWriter, context: Context) -> Self::Fut {
        (self.f)(event, writer, context)
    }
}

/// Runs a buffered handler under the streaming contract: the result bytes
/// are written and finished in one step, and the accumulated body goes out
/// with a Content-Length once the handler returns.
pub(crate) struct Buffered<H> {
    inner: H,
}

impl<H> Buffered<H> {
    pub(crate) fn new(inner: H) -> Self {
        Buffered { inner }
    }
}

impl<H> StreamingHandler for Buffered<H>
where
    H: Handler,
    H::Fut: Send + 'static,
    H::Error: Send,
{
    type Error = Diagnostic;
    type Fut = Pin<Box<dyn Future<Output = Result<(), Diagnostic>> + Send>>;

    fn call(&self, event: Bytes, writer: ResponseWriter, context: Context) -> Self::Fut {
        let fut = self.inner.call(event, context);
        Box::pin(async move {
            match fut.await {
                Ok(body) => {
                    writer.write_and_finish(body).await.map_err(Diagnostic::from)?;
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        })
    }
}
