use std::time::Duration;

/// Alias for a type-erased error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while building or shutting down instrumentation.
///
/// Per-request problems never surface as an [`Error`]; they degrade to a skipped attribute and
/// a debug event instead.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid regex {pattern:?}: {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid header name {name:?}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },

    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("sample rate must be a number, got {0}")]
    InvalidSampleRate(f64),

    #[error("both a tracer provider and a tracer were configured; pick one")]
    ConflictingProviders,

    #[error("exporter shutdown failed: {0}")]
    Shutdown(#[source] BoxError),

    #[error("exporter shutdown did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}
