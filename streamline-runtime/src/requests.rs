use crate::{diagnostic::Diagnostic, Error};
use bytes::Bytes;
use http::{Method, Request, Uri};
use std::str::FromStr;
use streamline_api_client::{body::Body, build_request};

pub(crate) trait IntoRequest {
    fn into_req(self) -> Result<Request<Body>, Error>;
}

// /runtime/invocation/next
#[derive(Debug, Eq, PartialEq)]
pub(crate) struct NextEventRequest;

impl IntoRequest for NextEventRequest {
    fn into_req(self) -> Result<Request<Body>, Error> {
        let req = build_request()
            .method(Method::GET)
            .uri(Uri::from_static("/2018-06-01/runtime/invocation/next"))
            .body(Body::empty())?;
        Ok(req)
    }
}

// /runtime/invocation/{AwsRequestId}/response, buffered.
// The body is sized, so the client reports it with a Content-Length.
pub(crate) struct EventCompletionRequest<'a> {
    pub(crate) request_id: &'a str,
    pub(crate) body: Bytes,
}

impl<'a> IntoRequest for EventCompletionRequest<'a> {
    fn into_req(self) -> Result<Request<Body>, Error> {
        let uri = format!("/2018-06-01/runtime/invocation/{}/response", self.request_id);
        let uri = Uri::from_str(&uri)?;

        let req = build_request()
            .method(Method::POST)
            .uri(uri)
            .body(Body::from(self.body))?;
        Ok(req)
    }
}

// /runtime/invocation/{AwsRequestId}/response, chunked.
// The caller keeps the sender half of the body channel and feeds it while
// the request is in flight. Midstream errors are reported using the
// declared error trailers.
// See: https://docs.aws.amazon.com/lambda/latest/dg/runtimes-custom.html#runtimes-custom-response-streaming
pub(crate) struct EventStreamRequest<'a> {
    pub(crate) request_id: &'a str,
    pub(crate) body: Body,
}

impl<'a> IntoRequest for EventStreamRequest<'a> {
    fn into_req(self) -> Result<Request<Body>, Error> {
        let uri = format!("/2018-06-01/runtime/invocation/{}/response", self.request_id);
        let uri = Uri::from_str(&uri)?;

        let mut builder = build_request().method(Method::POST).uri(uri);
        let req_headers = builder.headers_mut().ok_or("request builder is in an error state")?;

        req_headers.insert("Transfer-Encoding", "chunked".parse()?);
        req_headers.insert("Lambda-Runtime-Function-Response-Mode", "streaming".parse()?);
        req_headers.append("Trailer", "Lambda-Runtime-Function-Error-Type".parse()?);
        req_headers.append("Trailer", "Lambda-Runtime-Function-Error-Body".parse()?);
        req_headers.insert(
            "Content-Type",
            "application/vnd.awslambda.http-integration-response".parse()?,
        );

        let req = builder.body(self.body)?;
        Ok(req)
    }
}

// /runtime/invocation/{AwsRequestId}/error
pub(crate) struct EventErrorRequest<'a> {
    pub(crate) request_id: &'a str,
    pub(crate) diagnostic: Diagnostic,
}

impl<'a> EventErrorRequest<'a> {
    pub(crate) fn new(request_id: &'a str, diagnostic: Diagnostic) -> EventErrorRequest<'a> {
        EventErrorRequest {
            request_id,
            diagnostic,
        }
    }
}

impl<'a> IntoRequest for EventErrorRequest<'a> {
    fn into_req(self) -> Result<Request<Body>, Error> {
        let uri = format!("/2018-06-01/runtime/invocation/{}/error", self.request_id);
        let uri = Uri::from_str(&uri)?;
        let body = serde_json::to_vec(&self.diagnostic)?;
        let body = Body::from(body);

        let req = build_request()
            .method(Method::POST)
            .uri(uri)
            .header("lambda-runtime-function-error-type", "unhandled")
            .body(body)?;
        Ok(req)
    }
}

// /runtime/init/error
pub(crate) struct InitErrorRequest {
    pub(crate) diagnostic: Diagnostic,
}

impl IntoRequest for InitErrorRequest {
    fn into_req(self) -> Result<Request<Body>, Error> {
        let uri = Uri::from_static("/2018-06-01/runtime/init/error");
        let body = serde_json::to_vec(&self.diagnostic)?;
        let body = Body::from(body);

        let req = build_request()
            .method(Method::POST)
            .uri(uri)
            .header("lambda-runtime-function-error-type", "unhandled")
            .body(body)?;
        Ok(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_user_agent(req: &Request<Body>) {
        assert!(match req.headers().get("User-Agent") {
            Some(header) => header.to_str().unwrap().starts_with("streamline-lambda/"),
            None => false,
        });
    }

    #[test]
    fn test_next_event_request() {
        let req = NextEventRequest;
        let req = req.into_req().unwrap();
        assert_eq!(req.method(), Method::GET);
        assert_eq!(req.uri(), &Uri::from_static("/2018-06-01/runtime/invocation/next"));
        assert_user_agent(&req);
    }

    #[test]
    fn test_event_completion_request() {
        let req = EventCompletionRequest {
            request_id: "id",
            body: Bytes::from_static(b"hello, world!"),
        };
        let req = req.into_req().unwrap();
        let expected = Uri::from_static("/2018-06-01/runtime/invocation/id/response");
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.uri(), &expected);
        assert_user_agent(&req);
    }

    #[test]
    fn test_event_stream_request() {
        let (_tx, body) = Body::channel();
        let req = EventStreamRequest {
            request_id: "id",
            body,
        };
        let req = req.into_req().unwrap();
        let expected = Uri::from_static("/2018-06-01/runtime/invocation/id/response");
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.uri(), &expected);
        assert_eq!(req.headers()["Lambda-Runtime-Function-Response-Mode"], "streaming");
        assert_eq!(
            req.headers()["Content-Type"],
            "application/vnd.awslambda.http-integration-response"
        );
        let trailers: Vec<_> = req.headers().get_all("Trailer").iter().collect();
        assert_eq!(trailers.len(), 2);
        assert_user_agent(&req);
    }

    #[test]
    fn test_event_error_request() {
        let req = EventErrorRequest {
            request_id: "id",
            diagnostic: Diagnostic::new("InvalidEventDataError", "Error parsing event data"),
        };
        let req = req.into_req().unwrap();
        let expected = Uri::from_static("/2018-06-01/runtime/invocation/id/error");
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.uri(), &expected);
        assert_eq!(req.headers()["lambda-runtime-function-error-type"], "unhandled");
        assert_user_agent(&req);
    }

    #[test]
    fn test_init_error_request() {
        let req = InitErrorRequest {
            diagnostic: Diagnostic::new("Runtime.InitError", "handler factory failed"),
        };
        let req = req.into_req().unwrap();
        let expected = Uri::from_static("/2018-06-01/runtime/init/error");
        assert_eq!(req.method(), Method::POST);
        assert_eq!(req.uri(), &expected);
        assert_user_agent(&req);
    }
}
