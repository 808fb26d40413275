use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize application telemetry.
///
/// Configures `tracing-subscriber::fmt` for structured logging with dynamic
/// log levels via `RUST_LOG`. Document content is never logged; handlers tag
/// records with `session_id` and a request id instead.
pub fn init() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .compact();

    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lexgraph=debug"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
