//! OpenTelemetry middleware for [`tower`] HTTP services.
//!
//! - [`trace::TraceLayer`] records a server span per request.
//! - [`metrics::MetricsLayer`] records request count, duration, response size and in-flight
//!   requests.
//! - [`catch_panic::CatchPanicLayer`] turns handler panics into `500` responses.
//!
//! Both instrumentation layers share one decision pipeline ([`filter`]): a request is dropped
//! early when instrumentation is disabled, its path is excluded or it loses the sampling draw,
//! and otherwise only the headers and query parameters allowed by configuration are recorded.

pub mod attributes;
pub mod catch_panic;
pub mod classify;
pub mod config;
mod error;
pub mod event;
pub mod filter;
pub mod metrics;
pub mod provider;
pub mod response;
pub mod trace;

pub use config::{FilterOptions, Settings};
pub use error::{BoxError, Error, Result};
pub use event::{Event, EventHandler};

#[cfg(test)]
pub fn init_tracing_for_testing() -> ::tracing::dispatcher::DefaultGuard {
    use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter, FmtSubscriber};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_test_writer()
        .finish();

    ::tracing::subscriber::set_default(subscriber)
}
