//! Middleware that records OpenTelemetry request metrics.
//!
//! Four instruments are maintained per [`MetricsConfig`]:
//!
//! | name | kind | unit |
//! |---|---|---|
//! | `http.server.request_count` | counter | |
//! | `http.server.duration` | histogram | `s` |
//! | `http.server.response_size` | histogram | `By` |
//! | `http.server.active_requests` | up-down counter | |
//!
//! Measurements carry the method, scheme, host, service identity and final status code. The
//! route and static-route marker are added when a router put a
//! [`MatchedRoute`](crate::attributes::MatchedRoute) into the request extensions; the raw path is
//! never used since it would start one series per URL. Query parameters are only added when a
//! parameter whitelist is configured, headers only after
//! [`MetricsConfigBuilder::with_header_attributes`]. Together this keeps the number of series
//! bounded.
//!
//! A request dropped before its response was produced is counted with
//! `http.request.abandoned = true` instead of a status code.
//!
//! Filtering, sampling and exclusion work exactly as for [`crate::trace`]. Both layers can be
//! stacked; the response body is then counted once.

pub use self::{
    config::{
        MetricsConfig, MetricsConfigBuilder, MetricsHandle, ACTIVE_REQUESTS, DURATION,
        METER_NAME, REQUEST_COUNT, RESPONSE_SIZE,
    },
    layer::MetricsLayer,
    service::{Metrics, MetricsFinish},
};

mod config;
mod layer;
mod service;
