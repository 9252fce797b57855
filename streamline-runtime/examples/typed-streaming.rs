use serde::Deserialize;
use streamline_runtime::{streaming_codable_fn, Context, Error, ResponseWriter};

/// The handler sees this type whether the event arrives as plain JSON or
/// wrapped in a Function URL / API Gateway request envelope.
#[derive(Debug, Deserialize)]
struct CountEvent {
    count: u32,
    message: String,
}

async fn func(event: CountEvent, writer: ResponseWriter, _context: Context) -> Result<(), Error> {
    for i in 1..=event.count {
        writer.write(format!("{i}: {}\n", event.message)).await?;
    }
    writer.finish()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    streamline_runtime::tracing::init_default_subscriber();
    streamline_runtime::run_with_streaming_response(|| async { Ok(streaming_codable_fn(func)) }).await
}
