//! Middleware that records an OpenTelemetry span for every request.
//!
//! # Example
//!
//! ```rust
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use http_body_util::Full;
//! use tower::{ServiceBuilder, ServiceExt};
//! use tower_otel::{config::FilterOptions, trace::{TraceConfig, TraceLayer}};
//! use std::convert::Infallible;
//!
//! async fn handle(_request: Request<()>) -> Result<Response<Full<Bytes>>, Infallible> {
//!     Ok(Response::new(Full::new(Bytes::from("foo"))))
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TraceConfig::builder("orders")
//!     .service_version("1.0.0")
//!     .exclude_paths(["/health", "/metrics"])
//!     .record_headers(["x-request-id"])
//!     .sample_rate(0.25)
//!     .build()?;
//!
//! let service = ServiceBuilder::new()
//!     .layer(TraceLayer::new(config))
//!     .service_fn(handle);
//!
//! let response = service.oneshot(Request::new(())).await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```
//!
//! Without a tracer provider or tracer on the builder, spans go to the global tracer provider.
//!
//! # What is recorded
//!
//! Each traced request gets a server span named `"{METHOD} {path}"` carrying the request
//! attributes of [`crate::attributes`]. When the response body is done the span receives
//! `http.status_code` and `http.response_content_length`, and its status is set from the
//! [`StatusInRangeAsFailures`](crate::classify::StatusInRangeAsFailures) classifier.
//!
//! Requests that are excluded, not sampled or already cancelled pass through untouched: no span,
//! no attribute work and no hook call.
//!
//! The [`SpanHandle`] of a traced request is available to handlers through the request
//! extensions.

pub use self::{
    config::{FinishHook, StartHook, TraceConfig, TraceConfigBuilder, TRACER_NAME},
    handle::{SpanHandle, SpanState},
    layer::TraceLayer,
    service::{SpanFinish, Trace},
};

mod config;
mod handle;
mod layer;
mod service;
