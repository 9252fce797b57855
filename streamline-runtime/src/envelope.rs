//! HTTP proxy envelope detection for streaming codable handlers.
//!
//! Lambda Function URLs and API Gateway wrap the user payload in a request
//! envelope whose `body` field carries the real event, possibly base64
//! encoded. Handlers that take a decoded event should see the same payload
//! regardless of how the function was invoked, so the adapter reaches
//! through these envelopes before decoding.

use base64::{prelude::BASE64_STANDARD, Engine};
use bytes::Bytes;
use serde::Deserialize;

use crate::Error;

/// A Lambda Function URL request (HTTP API payload format 2.0).
///
/// Only the fields that drive detection and body extraction are modeled;
/// everything else in the envelope is ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionUrlRequest {
    /// The payload format version. Function URLs always send `2.0`.
    pub version: String,
    /// The raw request path.
    pub raw_path: String,
    /// Request context; its `http` block is what distinguishes the 2.0
    /// shape from the API Gateway REST shape.
    pub request_context: FunctionUrlRequestContext,
    /// The user payload.
    #[serde(default)]
    pub body: Option<String>,
    /// Whether `body` is base64 encoded.
    #[serde(default)]
    pub is_base64_encoded: bool,
}

/// The `requestContext` block of a Function URL request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionUrlRequestContext {
    /// Description of the HTTP request that hit the URL.
    pub http: FunctionUrlHttpDescription,
}

/// The `requestContext.http` block of a Function URL request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionUrlHttpDescription {
    /// The HTTP method.
    pub method: String,
    /// The request path.
    #[serde(default)]
    pub path: Option<String>,
}

/// An API Gateway REST request (proxy payload format 1.0).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGatewayProxyRequest {
    /// The HTTP method.
    pub http_method: String,
    /// The request path.
    pub path: String,
    /// The user payload.
    #[serde(default)]
    pub body: Option<String>,
    /// Whether `body` is base64 encoded.
    #[serde(default)]
    pub is_base64_encoded: bool,
}

/// The detected shape of an invocation payload.
///
/// The order of the variants is notable: detection tries them top to
/// bottom, and that order is part of the adapter's contract.
#[derive(Debug, Clone)]
pub enum InboundEnvelope {
    /// A Function URL (or HTTP API 2.0) request envelope.
    FunctionUrl(FunctionUrlRequest),
    /// An API Gateway REST request envelope.
    ApiGateway(ApiGatewayProxyRequest),
    /// No envelope; the bytes are the payload.
    Raw(Bytes),
}

impl InboundEnvelope {
    /// Detect the shape of an invocation payload.
    ///
    /// Detection is schema driven — a shape matches when the typed decode
    /// succeeds — never based on transport headers.
    pub fn detect(event: &Bytes) -> InboundEnvelope {
        if let Ok(request) = serde_json::from_slice::<FunctionUrlRequest>(event) {
            if request.version.starts_with("2.") {
                return InboundEnvelope::FunctionUrl(request);
            }
        }
        if let Ok(request) = serde_json::from_slice::<ApiGatewayProxyRequest>(event) {
            return InboundEnvelope::ApiGateway(request);
        }
        InboundEnvelope::Raw(event.clone())
    }

    /// Extract the user payload, decoding the envelope body when the
    /// envelope says it is base64 encoded.
    pub fn payload(self) -> Result<Bytes, Error> {
        match self {
            InboundEnvelope::FunctionUrl(request) => proxy_body(request.body, request.is_base64_encoded),
            InboundEnvelope::ApiGateway(request) => proxy_body(request.body, request.is_base64_encoded),
            InboundEnvelope::Raw(bytes) => Ok(bytes),
        }
    }
}

fn proxy_body(body: Option<String>, is_base64_encoded: bool) -> Result<Bytes, Error> {
    match body {
        None => Ok(Bytes::new()),
        Some(body) if is_base64_encoded => Ok(BASE64_STANDARD
            .decode(body)
            .map_err(|err| format!("invalid base64 in envelope body: {err}"))?
            .into()),
        Some(body) => Ok(Bytes::from(body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn function_url_event(body: serde_json::Value, base64: bool) -> Bytes {
        serde_json::to_vec(&json!({
            "version": "2.0",
            "routeKey": "$default",
            "rawPath": "/",
            "rawQueryString": "",
            "headers": {"content-type": "application/json"},
            "requestContext": {
                "http": {"method": "POST", "path": "/", "protocol": "HTTP/1.1"},
                "requestId": "id",
                "stage": "$default"
            },
            "body": body,
            "isBase64Encoded": base64,
        }))
        .unwrap()
        .into()
    }

    #[test]
    fn detects_function_url_envelopes() {
        let event = function_url_event(json!("{\"foo\":1}"), false);
        match InboundEnvelope::detect(&event) {
            InboundEnvelope::FunctionUrl(request) => assert_eq!(request.raw_path, "/"),
            other => panic!("expected a Function URL envelope, got {other:?}"),
        }
    }

    #[test]
    fn detects_api_gateway_envelopes() {
        let event: Bytes = serde_json::to_vec(&json!({
            "httpMethod": "POST",
            "path": "/prod/run",
            "body": "{\"foo\":1}",
            "isBase64Encoded": false,
        }))
        .unwrap()
        .into();
        match InboundEnvelope::detect(&event) {
            InboundEnvelope::ApiGateway(request) => assert_eq!(request.path, "/prod/run"),
            other => panic!("expected an API Gateway envelope, got {other:?}"),
        }
    }

    #[test]
    fn plain_json_stays_raw() {
        let event = Bytes::from_static(b"{\"foo\":1}");
        match InboundEnvelope::detect(&event) {
            InboundEnvelope::Raw(bytes) => assert_eq!(bytes, event),
            other => panic!("expected raw bytes, got {other:?}"),
        }
    }

    #[test]
    fn non_json_stays_raw() {
        let event = Bytes::from_static(b"hello");
        assert!(matches!(InboundEnvelope::detect(&event), InboundEnvelope::Raw(_)));
    }

    #[test]
    fn function_url_payload_passes_through() {
        let event = function_url_event(json!("{\"foo\":1}"), false);
        let payload = InboundEnvelope::detect(&event).payload().unwrap();
        assert_eq!(payload, Bytes::from_static(b"{\"foo\":1}"));
    }

    #[test]
    fn function_url_payload_decodes_base64() {
        let event = function_url_event(json!("eyJmb28iOjF9"), true);
        let payload = InboundEnvelope::detect(&event).payload().unwrap();
        assert_eq!(payload, Bytes::from_static(b"{\"foo\":1}"));
    }

    #[test]
    fn invalid_base64_is_an_error() {
        let event = function_url_event(json!("not base64!"), true);
        assert!(InboundEnvelope::detect(&event).payload().is_err());
    }

    #[test]
    fn missing_body_is_empty() {
        let event: Bytes = serde_json::to_vec(&json!({
            "version": "2.0",
            "rawPath": "/",
            "requestContext": {"http": {"method": "GET"}},
        }))
        .unwrap()
        .into();
        let payload = InboundEnvelope::detect(&event).payload().unwrap();
        assert!(payload.is_empty());
    }
}
