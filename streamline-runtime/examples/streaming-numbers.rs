use bytes::Bytes;
use http::StatusCode;
use std::time::Duration;
use streamline_runtime::{streaming_handler_fn, Context, Error, MetadataPrelude, ResponseWriter};

async fn func(_event: Bytes, writer: ResponseWriter, _context: Context) -> Result<(), Error> {
    let prelude = MetadataPrelude::new(StatusCode::IM_A_TEAPOT).with_header("Content-Type", "text/plain");
    writer.write_status_and_headers(prelude).await?;

    for i in 1..=3 {
        writer.write(format!("Number: {i}\n")).await?;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    writer.write_and_finish("Streaming complete!\n").await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    streamline_runtime::tracing::init_default_subscriber();
    streamline_runtime::run_with_streaming_response(|| async { Ok(streaming_handler_fn(func)) }).await
}
