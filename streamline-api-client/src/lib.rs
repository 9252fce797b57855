#![deny(clippy::all, clippy::cargo)]
#![warn(missing_docs, nonstandard_style, rust_2018_idioms)]
#![allow(clippy::multiple_crate_versions)]

//! Base HTTP client for the AWS Lambda Runtime API.
//!
//! The Runtime API is a loopback control plane: every request a runtime
//! makes goes to the same host, so the client is built around a base URI
//! and rewrites the relative paths it is handed into absolute form. The
//! underlying connection pool is kept alive across calls for the lifetime
//! of the execution environment.

use futures_util::{future::BoxFuture, FutureExt, TryFutureExt};
use http::{
    uri::{Parts, PathAndQuery, Scheme},
    Request, Response, Uri,
};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::future;

mod error;
pub use error::*;
pub mod body;

#[cfg(feature = "tracing")]
pub mod tracing;

/// `User-Agent` sent on every Runtime API request. Overridable at compile
/// time through `LAMBDA_RUNTIME_USER_AGENT`.
const USER_AGENT: &str = match option_env!("LAMBDA_RUNTIME_USER_AGENT") {
    Some(value) => value,
    None => concat!("streamline-lambda/", env!("CARGO_PKG_VERSION")),
};

/// API client for a Runtime API endpoint.
///
/// Cloning is cheap; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct Client {
    base: Uri,
    http: hyper_util::client::legacy::Client<HttpConnector, body::Body>,
}

impl Client {
    /// Start configuring a client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder { endpoint: None }
    }

    /// Send a request to the Runtime API, joining its path onto the
    /// client's base URI.
    ///
    /// The returned future owns everything it needs, so callers can hold it
    /// past the `&self` borrow or spawn it as its own task.
    pub fn call(&self, req: Request<body::Body>) -> BoxFuture<'static, Result<Response<Incoming>, BoxError>> {
        let (mut parts, body) = req.into_parts();
        parts.uri = match absolute_uri(&self.base, &parts.uri) {
            Ok(uri) => uri,
            Err(err) => return future::ready(Err(err)).boxed(),
        };
        self.http
            .request(Request::from_parts(parts, body))
            .map_err(Into::into)
            .boxed()
    }
}

/// Configures and constructs a [`Client`].
pub struct ClientBuilder {
    endpoint: Option<Uri>,
}

impl ClientBuilder {
    /// Point the client at an explicit endpoint instead of the
    /// `AWS_LAMBDA_RUNTIME_API` environment variable.
    pub fn with_endpoint(mut self, endpoint: Uri) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Construct the client.
    ///
    /// Without an explicit endpoint, `AWS_LAMBDA_RUNTIME_API` must hold the
    /// `host:port` of the Runtime API, the way the Lambda host provides it.
    pub fn build(self) -> Result<Client, BoxError> {
        let base = match self.endpoint {
            Some(uri) => uri,
            None => std::env::var("AWS_LAMBDA_RUNTIME_API")
                .map_err(|_| "AWS_LAMBDA_RUNTIME_API is not set")?
                .parse()
                .map_err(|err| format!("AWS_LAMBDA_RUNTIME_API is not a valid endpoint: {err}"))?,
        };
        let http = hyper_util::client::legacy::Client::builder(TokioExecutor::new())
            .http1_max_buf_size(1024 * 1024)
            .build(HttpConnector::new());
        Ok(Client { base, http })
    }
}

/// Rewrite a relative request URI into an absolute one under `base`.
///
/// The base may carry its own path prefix, and may be a bare authority
/// (`host:port`), in which case the scheme defaults to HTTP.
fn absolute_uri(base: &Uri, request: &Uri) -> Result<Uri, BoxError> {
    let authority = base
        .authority()
        .ok_or("Runtime API endpoint has no authority")?
        .clone();
    let path = request.path_and_query().ok_or("request URI has no path")?;

    let prefix = base.path().trim_end_matches('/');
    let joined: PathAndQuery = if prefix.is_empty() {
        path.clone()
    } else {
        format!("{prefix}{path}").parse()?
    };

    let mut parts = Parts::default();
    parts.scheme = Some(base.scheme().cloned().unwrap_or(Scheme::HTTP));
    parts.authority = Some(authority);
    parts.path_and_query = Some(joined);
    Ok(Uri::from_parts(parts)?)
}

/// Start an HTTP request with the runtime's `User-Agent` header set.
pub fn build_request() -> http::request::Builder {
    Request::builder().header(http::header::USER_AGENT, USER_AGENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn join(base: &str, path: &str) -> String {
        let base: Uri = base.parse().unwrap();
        absolute_uri(&base, &path.parse().unwrap()).unwrap().to_string()
    }

    #[test]
    fn joins_request_paths_onto_the_endpoint() {
        assert_eq!(
            join("http://localhost:9001", "/2018-06-01/runtime/invocation/next"),
            "http://localhost:9001/2018-06-01/runtime/invocation/next"
        );
    }

    #[test]
    fn keeps_the_endpoint_path_prefix() {
        for base in ["http://localhost:9001/foo", "http://localhost:9001/foo/"] {
            assert_eq!(
                join(base, "/2018-06-01/runtime/invocation/next"),
                "http://localhost:9001/foo/2018-06-01/runtime/invocation/next",
                "base {base} should keep its prefix"
            );
        }
    }

    #[test]
    fn defaults_to_http_for_bare_authorities() {
        // AWS_LAMBDA_RUNTIME_API is plain `host:port`, no scheme.
        assert_eq!(
            join("127.0.0.1:9001", "/2018-06-01/runtime/invocation/next"),
            "http://127.0.0.1:9001/2018-06-01/runtime/invocation/next"
        );
    }

    #[test]
    fn an_endpoint_without_an_authority_is_rejected() {
        let base: Uri = "/only-a-path".parse().unwrap();
        assert!(absolute_uri(&base, &"/x".parse().unwrap()).is_err());
    }

    #[test]
    fn requests_carry_the_user_agent() {
        let req = build_request().uri("/").body(()).unwrap();
        let agent = req.headers()[http::header::USER_AGENT].to_str().unwrap();
        assert!(agent.starts_with("streamline-lambda/"));
    }
}
