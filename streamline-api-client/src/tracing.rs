//! Logging bootstrap for functions built on this runtime.
//!
//! `tracing` and `tracing-subscriber` are re-exported so binaries don't
//! need to depend on them directly, alongside a ready-made subscriber wired
//! to the environment variables the runtime documents.

use std::env;

/// Re-export of the `tracing` crate: the `info!`, `debug!`, `trace!`
/// macros and friends.
pub use tracing::*;

/// Re-export of `tracing-subscriber`, for building custom subscribers.
pub use tracing_subscriber as subscriber;

use tracing_subscriber::filter::{EnvFilter, LevelFilter};

/// Install the default process-wide subscriber.
///
/// `LOG_LEVEL` sets the level to emit at (default `INFO`); it also accepts
/// full filter directives such as `warn,streamline_runtime=debug`. Set
/// `LOG_FORMAT=json` for structured output. Targets and timestamps are left
/// off every line: CloudWatch records ingestion time on its own.
pub fn init_default_subscriber() {
    let level = env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| level.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    let filter = EnvFilter::builder()
        .with_env_var("LOG_LEVEL")
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time();

    let json = env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
