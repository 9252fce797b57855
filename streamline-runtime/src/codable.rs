use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::{error::Error as StdError, fmt, fmt::Debug, future::Future, marker::PhantomData, pin::Pin};

use crate::{
    diagnostic::Diagnostic,
    envelope::InboundEnvelope,
    handler::{Handler, StreamingHandler, TypedStreamingHandler, TypedStreamingHandlerFn},
    streaming::ResponseWriter,
    typed_streaming_handler_fn, Context, Error,
};

/// Decodes invocation payload bytes into the handler's event type.
pub trait Decoder<T> {
    /// Decode the payload.
    fn decode(&self, payload: Bytes) -> Result<T, Error>;
}

/// Encodes the handler's output into response body bytes.
pub trait Encoder<T> {
    /// Encode the output.
    fn encode(&self, output: T) -> Result<Bytes, Error>;
}

/// Event payload deserialization error.
/// Returned when the data sent to the function cannot be deserialized
/// into the type that the function receives.
#[derive(Debug)]
pub struct DeserializeError {
    inner: serde_path_to_error::Error<serde_json::Error>,
}

impl fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.inner.path().to_string();
        if path == "." {
            writeln!(
                f,
                "failed to deserialize the incoming data into the function payload's type: {}",
                self.inner
            )
        } else {
            writeln!(
                f,
                "failed to deserialize the incoming data into the function payload's type: [{}] {}",
                path, self.inner
            )
        }
    }
}

impl StdError for DeserializeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.inner)
    }
}

impl From<DeserializeError> for Diagnostic {
    fn from(value: DeserializeError) -> Self {
        Diagnostic::new(crate::diagnostic::type_name_of_val(&value), value.to_string())
    }
}

/// JSON decoder for any deserializable event type. Decode errors name the
/// JSON path that failed.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDecoder;

impl<T> Decoder<T> for JsonDecoder
where
    T: for<'de> Deserialize<'de>,
{
    fn decode(&self, payload: Bytes) -> Result<T, Error> {
        let jd = &mut serde_json::Deserializer::from_slice(&payload);
        serde_path_to_error::deserialize(jd).map_err(|inner| Box::new(DeserializeError { inner }) as Error)
    }
}

/// JSON encoder for any serializable output type.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonEncoder;

impl<T> Encoder<T> for JsonEncoder
where
    T: Serialize,
{
    fn encode(&self, output: T) -> Result<Bytes, Error> {
        Ok(serde_json::to_vec(&output)?.into())
    }
}

/// Encoder for handlers without a response value: the body is empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnitEncoder;

impl Encoder<()> for UnitEncoder {
    fn encode(&self, _output: ()) -> Result<Bytes, Error> {
        Ok(Bytes::new())
    }
}

/// Wraps a typed asynchronous function into the buffered [`Handler`]
/// contract: the input is decoded before the function runs and the output
/// is encoded into the response body. Decoding and encoding failures are
/// reported as invocation errors.
pub struct CodableHandler<F, In, Out, D = JsonDecoder, E = JsonEncoder> {
    f: F,
    decoder: D,
    encoder: E,
    _phantom: PhantomData<fn(In) -> Out>,
}

/// Returns a new [`CodableHandler`] with the given closure, decoding the
/// event and encoding the output as JSON.
pub fn codable_fn<F, Fut, In, Out, Err>(f: F) -> CodableHandler<F, In, Out>
where
    F: Fn(In, Context) -> Fut,
    Fut: Future<Output = Result<Out, Err>>,
{
    CodableHandler {
        f,
        decoder: JsonDecoder,
        encoder: JsonEncoder,
        _phantom: PhantomData,
    }
}

/// Returns a new [`CodableHandler`] for a closure without a response value;
/// the invocation completes with an empty body.
pub fn codable_unit_fn<F, Fut, In, Err>(f: F) -> CodableHandler<F, In, (), JsonDecoder, UnitEncoder>
where
    F: Fn(In, Context) -> Fut,
    Fut: Future<Output = Result<(), Err>>,
{
    CodableHandler {
        f,
        decoder: JsonDecoder,
        encoder: UnitEncoder,
        _phantom: PhantomData,
    }
}

impl<F, In, Out, D, E> CodableHandler<F, In, Out, D, E> {
    /// Replace the input decoder.
    pub fn with_decoder<D2>(self, decoder: D2) -> CodableHandler<F, In, Out, D2, E> {
        CodableHandler {
            f: self.f,
            decoder,
            encoder: self.encoder,
            _phantom: PhantomData,
        }
    }

    /// Replace the output encoder.
    pub fn with_encoder<E2>(self, encoder: E2) -> CodableHandler<F, In, Out, D, E2> {
        CodableHandler {
            f: self.f,
            decoder: self.decoder,
            encoder,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut, In, Out, Err, D, E> Handler for CodableHandler<F, In, Out, D, E>
where
    F: Fn(In, Context) -> Fut,
    Fut: Future<Output = Result<Out, Err>> + Send + 'static,
    Err: Into<Diagnostic> + Debug,
    D: Decoder<In>,
    E: Encoder<Out> + Clone + Send + 'static,
    Out: 'static,
{
    type Error = Diagnostic;
    type Fut = Pin<Box<dyn Future<Output = Result<Bytes, Diagnostic>> + Send>>;

    fn call(&self, event: Bytes, context: Context) -> Self::Fut {
        let decoded = self.decoder.decode(event);
        let encoder = self.encoder.clone();
        match decoded {
            Ok(input) => {
                let fut = (self.f)(input, context);
                Box::pin(async move {
                    let output = fut.await.map_err(Into::into)?;
                    encoder.encode(output).map_err(Diagnostic::from)
                })
            }
            Err(err) => Box::pin(std::future::ready(Err(Diagnostic::from(err)))),
        }
    }
}

/// Wraps a [`TypedStreamingHandler`] into the byte-level
/// [`StreamingHandler`] contract, decoding the event through the
/// [`InboundEnvelope`] cascade first:
///
/// 1. a Function URL request envelope — the payload is its `body`, base64
///    decoded when the envelope says so;
/// 2. an API Gateway request envelope, with the same body rule;
/// 3. the raw event bytes.
///
/// The order is fixed: handlers rely on seeing the same decoded event no
/// matter how the function was invoked.
pub struct StreamingCodableHandler<H, T, D = JsonDecoder> {
    inner: H,
    decoder: D,
    _phantom: PhantomData<fn(T)>,
}

impl<H, T> StreamingCodableHandler<H, T> {
    /// Wrap a typed streaming handler with the JSON decoder.
    pub fn new(inner: H) -> Self {
        StreamingCodableHandler {
            inner,
            decoder: JsonDecoder,
            _phantom: PhantomData,
        }
    }
}

impl<H, T, D> StreamingCodableHandler<H, T, D> {
    /// Replace the payload decoder.
    pub fn with_decoder<D2>(self, decoder: D2) -> StreamingCodableHandler<H, T, D2> {
        StreamingCodableHandler {
            inner: self.inner,
            decoder,
            _phantom: PhantomData,
        }
    }
}

/// Returns a new [`StreamingCodableHandler`] with the given closure,
/// decoding the (possibly enveloped) event as JSON.
pub fn streaming_codable_fn<F, Fut, T, Err>(f: F) -> StreamingCodableHandler<TypedStreamingHandlerFn<F>, T>
where
    F: Fn(T, ResponseWriter, Context) -> Fut,
    Fut: Future<Output = Result<(), Err>>,
    Err: Into<Diagnostic> + Debug,
{
    StreamingCodableHandler::new(typed_streaming_handler_fn(f))
}

impl<H, T, D> StreamingHandler for StreamingCodableHandler<H, T, D>
where
    H: TypedStreamingHandler<T>,
    H::Fut: Send + 'static,
    D: Decoder<T>,
{
    type Error = Diagnostic;
    type Fut = Pin<Box<dyn Future<Output = Result<(), Diagnostic>> + Send>>;

    fn call(&self, event: Bytes, writer: ResponseWriter, context: Context) -> Self::Fut {
        let decoded = InboundEnvelope::detect(&event)
            .payload()
            .and_then(|payload| self.decoder.decode(payload));
        match decoded {
            Ok(input) => {
                let fut = self.inner.call(input, writer, context);
                Box::pin(async move { fut.await.map_err(Into::into) })
            }
            Err(err) => Box::pin(std::future::ready(Err(Diagnostic::from(err)))),
        }
    }
}
