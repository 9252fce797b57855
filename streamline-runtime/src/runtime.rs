use futures::FutureExt;
use http_body_util::BodyExt;
use std::{future::Future, panic, sync::Arc, time::Duration};
use streamline_api_client::Client;
use tokio::sync::watch;
use tracing::{debug, error, trace, warn, Instrument};

use crate::{
    config::Config,
    context::Context,
    diagnostic::Diagnostic,
    handler::{Buffered, Handler, StreamingHandler},
    requests::{EventCompletionRequest, EventErrorRequest, InitErrorRequest, IntoRequest, NextEventRequest},
    streaming::{Completion, ResponseMode, ResponseWriter},
    Error,
};

#[cfg(feature = "local-server")]
use crate::local_server::LocalServer;

const TRANSPORT_BACKOFF: Duration = Duration::from_millis(100);
const MAX_TRANSPORT_FAILURES: u32 = 3;

/// Builder for a [`Runtime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    config: Option<Config>,
    endpoint: Option<http::Uri>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl RuntimeBuilder {
    /// Use an explicit configuration instead of reading the environment.
    pub fn with_config(self, config: Config) -> Self {
        Self {
            config: Some(config),
            ..self
        }
    }

    /// Use an explicit Runtime API endpoint instead of the configured one.
    pub fn with_endpoint(self, endpoint: http::Uri) -> Self {
        Self {
            endpoint: Some(endpoint),
            ..self
        }
    }

    /// Use an external shutdown signal instead of installing the default
    /// SIGTERM/SIGINT handler. The runtime shuts down gracefully when the
    /// channel's value becomes `true`.
    pub fn with_shutdown_signal(self, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            shutdown: Some(shutdown),
            ..self
        }
    }

    /// Build the runtime.
    pub fn build(self) -> Result<Runtime, Error> {
        let config = match self.config {
            Some(config) => config,
            None => Config::from_env()?,
        };
        Ok(Runtime {
            config: Arc::new(config),
            endpoint: self.endpoint,
            shutdown: self.shutdown,
        })
    }
}

/// The runtime's invocation loop.
///
/// The runtime polls the Runtime API for invocations, dispatches each one to
/// the handler, and reports the result back — exactly one terminal report
/// per invocation, one invocation at a time, for the lifetime of the
/// process.
pub struct Runtime {
    config: Arc<Config>,
    endpoint: Option<http::Uri>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl Runtime {
    /// Create a builder struct to configure the runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Run a buffered handler.
    ///
    /// The factory is called once, at cold start. If it fails, the error is
    /// posted to `init/error` and the call returns the failure so `main` can
    /// exit non-zero.
    pub async fn run<F, Fut, H>(self, factory: F) -> Result<(), Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<H, Error>>,
        H: Handler,
        H::Fut: Send + 'static,
        H::Error: Send,
    {
        self.run_inner(
            move || async move { factory().await.map(Buffered::new) },
            ResponseMode::Buffered,
        )
        .await
    }

    /// Run a streaming handler. Same lifecycle as [`run`][Self::run], but
    /// each write the handler makes flushes a chunk of the response.
    pub async fn run_with_streaming_response<F, Fut, H>(self, factory: F) -> Result<(), Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<H, Error>>,
        H: StreamingHandler,
    {
        self.run_inner(factory, ResponseMode::Streamed).await
    }

    async fn run_inner<F, Fut, H>(mut self, factory: F, mode: ResponseMode) -> Result<(), Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<H, Error>>,
        H: StreamingHandler,
    {
        let config = self.config.clone();

        #[cfg(feature = "local-server")]
        if config.local_server_enabled && self.endpoint.is_none() {
            let server = LocalServer::bind(&config).await?;
            let addr = server.local_addr();
            debug!(%addr, "local invocation server listening");
            tokio::spawn(server.serve());
            self.endpoint = Some(format!("http://{addr}").parse()?);
        }
        #[cfg(not(feature = "local-server"))]
        if config.local_server_enabled {
            return Err("local server support is not compiled into this build".into());
        }

        let endpoint = match self.endpoint.take() {
            Some(endpoint) => endpoint,
            None => config.endpoint()?,
        };
        let client = Client::builder().with_endpoint(endpoint).build()?;

        let mut shutdown = match self.shutdown.take() {
            Some(shutdown) => shutdown,
            None => spawn_shutdown_listener(),
        };

        trace!("constructing handler (cold start)");
        let handler = match factory().await {
            Ok(handler) => handler,
            Err(err) => {
                error!(error = %err, "handler factory failed; reporting init error");
                let req = InitErrorRequest {
                    diagnostic: Diagnostic::from(err),
                }
                .into_req()?;
                if let Err(post_err) = client.call(req).await {
                    error!(error = %post_err, "failed to post the init error");
                }
                return Err("handler initialization failed".into());
            }
        };

        let mut invocations_handled: u32 = 0;
        let mut transport_failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                debug!("shutdown requested; no longer polling for events");
                break;
            }

            trace!("waiting for the next event");
            let next_req = NextEventRequest.into_req()?;
            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("shutdown channel closed; stopping");
                        break;
                    }
                    continue;
                }
                result = client.call(next_req) => result,
            };

            let response = match next {
                Ok(response) => {
                    transport_failures = 0;
                    response
                }
                Err(err) => {
                    transport_failures += 1;
                    if transport_failures >= MAX_TRANSPORT_FAILURES {
                        error!(error = %err, "repeated transport failures polling for events; giving up");
                        return Err(err);
                    }
                    warn!(error = %err, "transport error polling for the next event; backing off");
                    tokio::time::sleep(TRANSPORT_BACKOFF).await;
                    continue;
                }
            };

            let (parts, body) = response.into_parts();

            #[cfg(debug_assertions)]
            if parts.status == http::StatusCode::NO_CONTENT {
                // Keep the runtime alive when there are no events pending.
                continue;
            }

            let context = match Context::new(&parts.headers, config.clone()) {
                Ok(context) => context,
                Err(err) => {
                    // A response without the mandatory headers carries no
                    // request id, so there is nothing to report an error
                    // against. Treat it as a transient server fault.
                    warn!(error = %err, "malformed next-event response; backing off and retrying");
                    tokio::time::sleep(TRANSPORT_BACKOFF).await;
                    continue;
                }
            };

            let request_id = context.request_id.clone();
            let request_span = context.request_span();

            let dispatch = async {
                let event = match body.collect().await {
                    Ok(collected) => collected.to_bytes(),
                    Err(err) => {
                        warn!(error = %err, "failed to read the event body");
                        let diagnostic = Diagnostic::new("Runtime.EventBodyError", err.to_string());
                        report(&client, EventErrorRequest::new(&request_id, diagnostic)).await;
                        return;
                    }
                };
                trace!(bytes = event.len(), "dispatching event");

                let writer = ResponseWriter::new(client.clone(), &request_id, mode);
                let reclaim = writer.clone();

                // Catches panics that happen before the future is created,
                // then panics that happen inside of it.
                let task = panic::catch_unwind(panic::AssertUnwindSafe(|| handler.call(event, writer, context)));
                let outcome = match task {
                    Ok(task) => panic::AssertUnwindSafe(task).catch_unwind().await,
                    Err(err) => Err(err),
                };

                let handler_error = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => {
                        debug!(error = ?err, "handler returned an error");
                        Some(err.into())
                    }
                    Err(payload) => {
                        let message = if let Some(msg) = payload.downcast_ref::<&str>() {
                            format!("Lambda panicked: {msg}")
                        } else if let Some(msg) = payload.downcast_ref::<String>() {
                            format!("Lambda panicked: {msg}")
                        } else {
                            "Lambda panicked".to_string()
                        };
                        error!(%message, "handler panicked");
                        Some(Diagnostic::new("Runtime.UnhandledError", message))
                    }
                };

                match reclaim.complete(handler_error).await {
                    Ok(Completion::Respond(body)) => {
                        report(&client, EventCompletionRequest {
                            request_id: &request_id,
                            body,
                        })
                        .await;
                    }
                    Ok(Completion::RespondError(diagnostic)) => {
                        report(&client, EventErrorRequest::new(&request_id, diagnostic)).await;
                    }
                    Ok(Completion::Streamed) => {
                        trace!("streamed response already reported");
                    }
                    Err(err) => {
                        error!(error = %err, "failed to resolve the invocation's terminal report");
                    }
                }
            };
            dispatch.instrument(request_span).await;

            invocations_handled += 1;
            if config.max_invocations > 0 && invocations_handled >= config.max_invocations {
                debug!(invocations_handled, "reached the configured invocation limit");
                break;
            }
        }

        Ok(())
    }
}

/// Post a terminal report, logging instead of failing the loop: a rejected
/// report is the host's problem to retry at its level.
async fn report(client: &Client, request: impl IntoRequest) {
    let req = match request.into_req() {
        Ok(req) => req,
        Err(err) => {
            error!(error = %err, "failed to build the terminal report");
            return;
        }
    };
    match client.call(req).await {
        Ok(response) if !response.status().is_success() => {
            error!(status = %response.status(), "Runtime API rejected the report");
        }
        Ok(_) => trace!("report accepted"),
        Err(err) => {
            error!(error = %err, "failed to post the report");
        }
    }
}

/// Install the default graceful-shutdown handler: SIGTERM or SIGINT flips
/// the watch flag, which stops the loop after the current invocation and
/// cancels an in-flight poll.
fn spawn_shutdown_listener() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        debug!("received a termination signal");
        let _ = tx.send(true);
        // Keep the sender alive so the loop's receiver stays subscribed.
        std::future::pending::<()>().await;
    });
    rx
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            error!(error = %err, "failed to install the SIGTERM handler");
            std::future::pending::<()>().await;
            unreachable!();
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
