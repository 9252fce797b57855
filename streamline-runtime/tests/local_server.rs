//! End-to-end tests driving the runtime through the local invocation
//! server, the same way `cargo run` local development does: events go in
//! through `POST /invoke`, and the handler's report comes back as the HTTP
//! response.

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::BodyExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use streamline_api_client::{body::Body, build_request, Client};
use streamline_runtime::{
    handler_fn, streaming_handler_fn, Config, Context, Diagnostic, Error, LocalServer, ResponseWriter, Runtime,
};

fn server_config() -> Config {
    Config {
        local_server_enabled: true,
        port: 0,
        ..Config::default()
    }
}

fn runtime_config(max_invocations: u32) -> Config {
    Config {
        max_invocations,
        ..Config::default()
    }
}

/// Bind a local server on an ephemeral port and return a client pointed at
/// it plus the endpoint the runtime should poll.
async fn start_local_server() -> (Client, http::Uri) {
    let server = LocalServer::bind(&server_config()).await.expect("bind failed");
    let endpoint: http::Uri = format!("http://{}", server.local_addr()).parse().unwrap();
    tokio::spawn(server.serve());
    let client = Client::builder()
        .with_endpoint(endpoint.clone())
        .build()
        .expect("client failed");
    (client, endpoint)
}

async fn invoke(client: &Client, payload: &'static str) -> (StatusCode, Bytes) {
    let req = build_request()
        .method(Method::POST)
        .uri("/invoke")
        .body(Body::from(payload))
        .expect("request failed");
    let rsp = client.call(req).await.expect("invoke failed");
    let status = rsp.status();
    let body = rsp.into_body().collect().await.expect("body failed").to_bytes();
    (status, body)
}

#[tokio::test]
async fn buffered_echo_over_three_invocations() -> Result<(), Error> {
    let (client, endpoint) = start_local_server().await;

    static FACTORY_CALLS: AtomicU32 = AtomicU32::new(0);
    let handler = handler_fn(|event: Bytes, _: Context| async move {
        let reversed: Vec<u8> = event.iter().rev().copied().collect();
        Ok::<_, Error>(Bytes::from(reversed))
    });

    let runtime = Runtime::builder()
        .with_config(runtime_config(3))
        .with_endpoint(endpoint)
        .build()?;
    let run = tokio::spawn(runtime.run(|| async move {
        FACTORY_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(handler)
    }));

    // The runtime's poll is already parked on `next` by the time the first
    // event arrives; each invoke resolves only when its report lands.
    tokio::time::sleep(Duration::from_millis(100)).await;
    for _ in 0..3 {
        let (status, body) = invoke(&client, "hello").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"olleh"));
    }

    run.await.expect("runtime task panicked")?;
    assert_eq!(FACTORY_CALLS.load(Ordering::SeqCst), 1, "cold start must happen once");
    Ok(())
}

#[tokio::test]
async fn handler_error_surfaces_as_a_5xx_report() -> Result<(), Error> {
    let (client, endpoint) = start_local_server().await;

    let handler = handler_fn(|event: Bytes, _: Context| async move {
        if event.as_ref() == b"boom" {
            return Err(Diagnostic::new("APIError.invalidRequest", "refusing to process"));
        }
        Ok(event)
    });

    let runtime = Runtime::builder()
        .with_config(runtime_config(2))
        .with_endpoint(endpoint)
        .build()?;
    let run = tokio::spawn(runtime.run(|| async move { Ok(handler) }));

    let (status, body) = invoke(&client, "boom").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let report: Diagnostic = serde_json::from_slice(&body).expect("error report should be JSON");
    assert_eq!(report.error_type, "APIError.invalidRequest");
    assert_eq!(report.error_message, "refusing to process");

    // The loop keeps serving after the failure.
    let (status, body) = invoke(&client, "ok").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"ok"));

    run.await.expect("runtime task panicked")?;
    Ok(())
}

#[tokio::test]
async fn streamed_chunks_arrive_as_one_invoke_body() -> Result<(), Error> {
    let (client, endpoint) = start_local_server().await;

    let handler = streaming_handler_fn(|_: Bytes, writer: ResponseWriter, _: Context| async move {
        for i in 1..=3 {
            writer.write(format!("Number: {i}\n")).await?;
        }
        writer.write_and_finish("Streaming complete!\n").await?;
        Ok::<_, Error>(())
    });

    let runtime = Runtime::builder()
        .with_config(runtime_config(1))
        .with_endpoint(endpoint)
        .build()?;
    let run = tokio::spawn(runtime.run_with_streaming_response(|| async move { Ok(handler) }));

    let (status, body) = invoke(&client, "start").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        Bytes::from_static(b"Number: 1\nNumber: 2\nNumber: 3\nStreaming complete!\n")
    );

    run.await.expect("runtime task panicked")?;
    Ok(())
}

#[tokio::test]
async fn double_finish_is_reported_and_the_loop_survives() -> Result<(), Error> {
    let (client, endpoint) = start_local_server().await;

    let handler = streaming_handler_fn(|event: Bytes, writer: ResponseWriter, _: Context| async move {
        writer.write(event).await?;
        writer.finish()?;
        // Contract misuse: the fault is reported as a stream trailer and
        // must not take the process down.
        let _ = writer.finish();
        Ok::<_, Error>(())
    });

    let runtime = Runtime::builder()
        .with_config(runtime_config(2))
        .with_endpoint(endpoint)
        .build()?;
    let run = tokio::spawn(runtime.run_with_streaming_response(|| async move { Ok(handler) }));

    let (status, body) = invoke(&client, "first").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"first"));

    let (status, body) = invoke(&client, "second").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Bytes::from_static(b"second"));

    run.await.expect("runtime task panicked")?;
    Ok(())
}
