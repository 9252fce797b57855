use bytes::Bytes;
use streamline_runtime::{handler_fn, Context, Error};

#[tokio::main]
async fn main() -> Result<(), Error> {
    // required to enable CloudWatch error logging by the runtime
    streamline_runtime::tracing::init_default_subscriber();

    streamline_runtime::run(|| async {
        Ok(handler_fn(|event: Bytes, context: Context| async move {
            tracing::info!(remaining = ?context.time_remaining(), "echoing the event back");
            Ok::<_, Error>(event)
        }))
    })
    .await
}
