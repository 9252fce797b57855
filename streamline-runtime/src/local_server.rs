//! A loopback stand-in for the Lambda Runtime API, used for offline
//! development and tests.
//!
//! The server speaks the same control-plane protocol the real Runtime API
//! does, and additionally exposes `POST /invoke`: the caller's body is
//! queued as an invocation with synthesized metadata, and the connection is
//! held open until the handler reports a result for it.

use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::{body::Incoming, service::service_fn};
use hyper_util::rt::TokioIo;
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};
use streamline_api_client::body::Body;
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::{Config, PayloadMode},
    context::now_epoch_ms,
    Error,
};

const SYNTHETIC_ARN: &str = "arn:aws:lambda:us-east-1:000000000000:function:streamline-local";
const INVOKE_DEADLINE_MS: u64 = 300_000;

struct QueuedInvocation {
    request_id: String,
    deadline_ms: u64,
    payload: Bytes,
}

enum InvokeOutcome {
    /// The handler posted a response body.
    Response(Bytes),
    /// The handler posted an error report.
    Error(Bytes),
}

struct ServerState {
    queue_tx: mpsc::UnboundedSender<QueuedInvocation>,
    queue_rx: AsyncMutex<mpsc::UnboundedReceiver<QueuedInvocation>>,
    pending: Mutex<HashMap<String, oneshot::Sender<InvokeOutcome>>>,
    mode: PayloadMode,
    max_invocations: u32,
    served: AtomicU32,
    done: Notify,
}

/// The local invocation server.
pub struct LocalServer {
    listener: TcpListener,
    addr: SocketAddr,
    state: Arc<ServerState>,
}

impl LocalServer {
    /// Bind the server on the configured host and port.
    pub async fn bind(config: &Config) -> Result<Self, Error> {
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Ok(LocalServer {
            listener,
            addr,
            state: Arc::new(ServerState {
                queue_tx,
                queue_rx: AsyncMutex::new(queue_rx),
                pending: Mutex::new(HashMap::new()),
                mode: config.mode,
                max_invocations: config.max_invocations,
                served: AtomicU32::new(0),
                done: Notify::new(),
            }),
        })
    }

    /// The address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Accept and serve connections until the configured invocation limit
    /// is reached.
    pub async fn serve(self) -> Result<(), Error> {
        info!(addr = %self.addr, "local invocation server started");
        loop {
            let accepted = tokio::select! {
                _ = self.state.done.notified() => {
                    debug!("served the configured number of invocations; local server stopping");
                    break;
                }
                accepted = self.listener.accept() => accepted,
            };
            let (stream, _) = accepted?;
            let state = self.state.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| handle(state.clone(), req));
                if let Err(err) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    // Cancelled long polls surface here when the runtime
                    // shuts down; that's part of normal operation.
                    debug!(error = %err, "local server connection closed with an error");
                }
            });
        }
        Ok(())
    }
}

async fn handle(state: Arc<ServerState>, req: Request<Incoming>) -> Result<Response<Body>, Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let segments: Vec<&str> = path.split('/').collect();

    match segments[1..] {
        ["2018-06-01", "runtime", "invocation", "next"] if method == Method::GET => next_invocation(state).await,
        ["2018-06-01", "runtime", "invocation", id, "response"] if method == Method::POST => {
            let id = id.to_string();
            invocation_result(state, &id, req, false).await
        }
        ["2018-06-01", "runtime", "invocation", id, "error"] if method == Method::POST => {
            let id = id.to_string();
            invocation_result(state, &id, req, true).await
        }
        ["2018-06-01", "runtime", "init", "error"] if method == Method::POST => init_error(req).await,
        ["invoke"] if method == Method::POST => invoke(state, req).await,
        _ => {
            warn!(%method, %path, "unexpected request to the local server");
            status_response(StatusCode::NOT_FOUND)
        }
    }
}

/// Serve the next invocation. Blocks until one is queued, like the real
/// Runtime API's long poll.
async fn next_invocation(state: Arc<ServerState>) -> Result<Response<Body>, Error> {
    if state.max_invocations > 0 {
        let served = state.served.fetch_add(1, Ordering::SeqCst);
        if served >= state.max_invocations {
            // notify_one stores a permit, so the accept loop sees the stop
            // request even if it isn't parked on the notifier right now.
            state.done.notify_one();
            return status_response(StatusCode::GONE);
        }
        if served + 1 == state.max_invocations {
            state.done.notify_one();
        }
    }

    let invocation = match state.mode {
        PayloadMode::String => canned_invocation(|id| Bytes::from(format!("\"{id}\""))),
        PayloadMode::Json => canned_invocation(|id| Bytes::from(format!("{{\"name\":\"{id}\"}}"))),
        PayloadMode::Off => {
            let mut queue = state.queue_rx.lock().await;
            match queue.recv().await {
                Some(invocation) => invocation,
                None => return status_response(StatusCode::SERVICE_UNAVAILABLE),
            }
        }
    };

    debug!(request_id = %invocation.request_id, "serving invocation");
    NextEventResponse {
        request_id: &invocation.request_id,
        deadline_ms: invocation.deadline_ms,
        arn: SYNTHETIC_ARN,
        body: invocation.payload,
    }
    .into_rsp()
}

fn canned_invocation(payload: impl Fn(&str) -> Bytes) -> QueuedInvocation {
    let request_id = Uuid::new_v4().to_string();
    QueuedInvocation {
        payload: payload(&request_id),
        deadline_ms: now_epoch_ms() + INVOKE_DEADLINE_MS,
        request_id,
    }
}

/// Resolve the `/invoke` client waiting on this request id, if any.
async fn invocation_result(
    state: Arc<ServerState>,
    request_id: &str,
    req: Request<Incoming>,
    is_error: bool,
) -> Result<Response<Body>, Error> {
    let body = req.into_body().collect().await?.to_bytes();
    let waiter = state
        .pending
        .lock()
        .unwrap_or_else(|err| err.into_inner())
        .remove(request_id);

    match waiter {
        Some(tx) => {
            let outcome = if is_error {
                InvokeOutcome::Error(body)
            } else {
                InvokeOutcome::Response(body)
            };
            if tx.send(outcome).is_err() {
                warn!(%request_id, "invoke client went away before the result arrived");
            }
        }
        // Canned invocations have no waiting client.
        None => debug!(%request_id, is_error, "result for an invocation without a waiting client"),
    }

    status_response(StatusCode::ACCEPTED)
}

async fn init_error(req: Request<Incoming>) -> Result<Response<Body>, Error> {
    let body = req.into_body().collect().await?.to_bytes();
    error!(report = %String::from_utf8_lossy(&body), "runtime reported an initialization error");
    status_response(StatusCode::ACCEPTED)
}

/// Queue the caller's payload as an invocation and wait for its result.
async fn invoke(state: Arc<ServerState>, req: Request<Incoming>) -> Result<Response<Body>, Error> {
    let payload = req.into_body().collect().await?.to_bytes();
    let request_id = Uuid::new_v4().to_string();
    let (tx, rx) = oneshot::channel();

    state
        .pending
        .lock()
        .unwrap_or_else(|err| err.into_inner())
        .insert(request_id.clone(), tx);

    let invocation = QueuedInvocation {
        request_id: request_id.clone(),
        deadline_ms: now_epoch_ms() + INVOKE_DEADLINE_MS,
        payload,
    };
    if state.queue_tx.send(invocation).is_err() {
        return status_response(StatusCode::SERVICE_UNAVAILABLE);
    }
    debug!(%request_id, "queued invocation");

    match rx.await {
        Ok(InvokeOutcome::Response(body)) => Ok(Response::builder().status(StatusCode::OK).body(Body::from(body))?),
        Ok(InvokeOutcome::Error(report)) => Ok(Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .header("content-type", "application/json")
            .body(Body::from(report))?),
        Err(_) => status_response(StatusCode::SERVICE_UNAVAILABLE),
    }
}

fn status_response(status: StatusCode) -> Result<Response<Body>, Error> {
    Ok(Response::builder().status(status).body(Body::empty())?)
}

// The response shape of the `next` endpoint.
struct NextEventResponse<'a> {
    // lambda-runtime-aws-request-id
    request_id: &'a str,
    // lambda-runtime-deadline-ms
    deadline_ms: u64,
    // lambda-runtime-invoked-function-arn
    arn: &'a str,
    // the actual body
    body: Bytes,
}

impl<'a> NextEventResponse<'a> {
    fn into_rsp(self) -> Result<Response<Body>, Error> {
        let rsp = Response::builder()
            .header("lambda-runtime-aws-request-id", self.request_id)
            .header("lambda-runtime-deadline-ms", self.deadline_ms)
            .header("lambda-runtime-invoked-function-arn", self.arn)
            .body(Body::from(self.body))?;
        Ok(rsp)
    }
}
