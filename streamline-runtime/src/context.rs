use http::HeaderMap;
use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use crate::{Config, Error};

/// The Lambda function execution context. The values in this struct are
/// populated from the headers returned by the poll request to the Runtime
/// API, and are valid for a single invocation.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct Context {
    /// The AWS request ID generated by the Lambda service.
    pub request_id: String,
    /// The execution deadline for the current invocation, in unix epoch
    /// milliseconds.
    pub deadline_ms: u64,
    /// The ARN of the Lambda function being invoked.
    pub invoked_function_arn: String,
    /// The X-Ray trace ID for the current invocation.
    pub xray_trace_id: Option<String>,
    /// The client context sent by the AWS Mobile SDK, base64 encoded.
    /// The payload is opaque to the runtime; decoding it is the handler's
    /// concern.
    pub client_context: Option<String>,
    /// The Cognito identity that invoked the function, base64 encoded.
    /// Opaque to the runtime, like `client_context`.
    pub cognito_identity: Option<String>,
    /// Process-wide configuration.
    pub env_config: Arc<Config>,
    clock: DeadlineClock,
}

/// Epoch/monotonic calibration pair captured when the invocation is
/// delivered, so later wall-clock adjustments don't skew the deadline math.
#[derive(Clone, Copy, Debug)]
struct DeadlineClock {
    epoch_ms: u64,
    instant: Instant,
}

impl DeadlineClock {
    fn now() -> Self {
        DeadlineClock {
            epoch_ms: now_epoch_ms(),
            instant: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch_ms.saturating_add(self.instant.elapsed().as_millis() as u64)
    }
}

pub(crate) fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_millis() as u64)
        .unwrap_or(0)
}

impl Context {
    /// Build a context from the headers of a `next` response.
    ///
    /// The request id, deadline, and function ARN headers are mandatory;
    /// a response without them is malformed and is not dispatched.
    pub(crate) fn new(headers: &HeaderMap, env_config: Arc<Config>) -> Result<Self, Error> {
        let request_id = mandatory_header(headers, "lambda-runtime-aws-request-id")?;
        let deadline_ms = mandatory_header(headers, "lambda-runtime-deadline-ms")?
            .parse::<u64>()
            .map_err(|err| format!("lambda-runtime-deadline-ms is not a valid deadline: {err}"))?;
        let invoked_function_arn = mandatory_header(headers, "lambda-runtime-invoked-function-arn")?;

        Ok(Context {
            request_id,
            deadline_ms,
            invoked_function_arn,
            xray_trace_id: optional_header(headers, "lambda-runtime-trace-id"),
            client_context: optional_header(headers, "lambda-runtime-client-context")
                .or_else(|| optional_header(headers, "x-amz-client-context")),
            cognito_identity: optional_header(headers, "lambda-runtime-cognito-identity")
                .or_else(|| optional_header(headers, "x-amz-cognito-identity")),
            env_config,
            clock: DeadlineClock::now(),
        })
    }

    /// The time left before the host terminates this invocation.
    ///
    /// Computed against a monotonic clock calibrated when the invocation was
    /// delivered. Returns zero once the deadline has passed; the runtime
    /// itself never cancels a running handler.
    pub fn time_remaining(&self) -> Duration {
        Duration::from_millis(self.deadline_ms.saturating_sub(self.clock.now_ms()))
    }

    /// A span tagged with this invocation's request id.
    ///
    /// The runtime instruments the whole invocation with it, so every record
    /// logged while the handler runs carries a `requestId` field.
    pub fn request_span(&self) -> tracing::Span {
        match &self.xray_trace_id {
            Some(trace_id) => {
                std::env::set_var("_X_AMZN_TRACE_ID", trace_id);
                tracing::info_span!(
                    "Lambda runtime invoke",
                    requestId = self.request_id.as_str(),
                    xrayTraceId = trace_id.as_str()
                )
            }
            None => {
                std::env::remove_var("_X_AMZN_TRACE_ID");
                tracing::info_span!("Lambda runtime invoke", requestId = self.request_id.as_str())
            }
        }
    }
}

fn mandatory_header(headers: &HeaderMap, name: &str) -> Result<String, Error> {
    headers
        .get(name)
        .ok_or_else(|| Error::from(format!("missing mandatory header {name}")))?
        .to_str()
        .map(ToOwned::to_owned)
        .map_err(|err| format!("header {name} is not valid UTF-8: {err}").into())
}

fn optional_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .map(|value| String::from_utf8_lossy(value.as_bytes()).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("lambda-runtime-aws-request-id", HeaderValue::from_static("my-id"));
        headers.insert("lambda-runtime-deadline-ms", HeaderValue::from_static("123"));
        headers.insert(
            "lambda-runtime-invoked-function-arn",
            HeaderValue::from_static("arn::myarn"),
        );
        headers
    }

    fn far_future_ms() -> u64 {
        now_epoch_ms() + 60_000
    }

    #[test]
    fn context_with_expected_values_and_types_resolves() {
        let mut headers = headers();
        headers.insert("lambda-runtime-trace-id", HeaderValue::from_static("Root=1-5bef4de7"));
        let context = Context::new(&headers, Arc::new(Config::default())).expect("context should resolve");
        assert_eq!(context.request_id, "my-id");
        assert_eq!(context.deadline_ms, 123);
        assert_eq!(context.invoked_function_arn, "arn::myarn");
        assert_eq!(context.xray_trace_id.as_deref(), Some("Root=1-5bef4de7"));
    }

    #[test]
    fn context_with_client_context_resolves() {
        let mut headers = headers();
        headers.insert("lambda-runtime-client-context", HeaderValue::from_static("eyJjbGllbnQiOnt9fQ=="));
        let context = Context::new(&headers, Arc::new(Config::default())).expect("context should resolve");
        assert_eq!(context.client_context.as_deref(), Some("eyJjbGllbnQiOnt9fQ=="));
    }

    #[test]
    fn context_accepts_amz_header_spellings() {
        let mut headers = headers();
        headers.insert("x-amz-client-context", HeaderValue::from_static("Y3R4"));
        headers.insert("x-amz-cognito-identity", HeaderValue::from_static("aWQ="));
        let context = Context::new(&headers, Arc::new(Config::default())).expect("context should resolve");
        assert_eq!(context.client_context.as_deref(), Some("Y3R4"));
        assert_eq!(context.cognito_identity.as_deref(), Some("aWQ="));
    }

    #[test]
    fn context_with_missing_request_id_is_err() {
        let mut headers = headers();
        headers.remove("lambda-runtime-aws-request-id");
        assert!(Context::new(&headers, Arc::new(Config::default())).is_err());
    }

    #[test]
    fn context_with_missing_arn_is_err() {
        let mut headers = headers();
        headers.remove("lambda-runtime-invoked-function-arn");
        assert!(Context::new(&headers, Arc::new(Config::default())).is_err());
    }

    #[test]
    fn context_with_bad_deadline_type_is_err() {
        let mut headers = headers();
        headers.insert(
            "lambda-runtime-deadline-ms",
            HeaderValue::from_static("BAD-Type,not <u64>"),
        );
        assert!(Context::new(&headers, Arc::new(Config::default())).is_err());
    }

    #[test]
    fn time_remaining_counts_down_to_the_deadline() {
        let mut headers = headers();
        let deadline = far_future_ms();
        headers.insert(
            "lambda-runtime-deadline-ms",
            HeaderValue::from_str(&deadline.to_string()).unwrap(),
        );
        let context = Context::new(&headers, Arc::new(Config::default())).expect("context should resolve");
        let remaining = context.time_remaining();
        assert!(remaining > Duration::from_secs(50));
        assert!(remaining <= Duration::from_secs(60));
    }

    #[test]
    fn time_remaining_is_zero_after_the_deadline() {
        let context = Context::new(&headers(), Arc::new(Config::default())).expect("context should resolve");
        assert_eq!(context.time_remaining(), Duration::ZERO);
    }
}
