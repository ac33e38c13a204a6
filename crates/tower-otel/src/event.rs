//! Internal events raised by the middleware.
//!
//! Every [`Event`] is logged through [`tracing`] at its own level. When an [`EventHandler`] is
//! configured it additionally receives the event, which lets applications forward
//! configuration warnings and export failures to their own alerting.

use std::{fmt, sync::Arc, time::Duration};
use tracing::Level;

/// Sink receiving [`Event`]s.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Event {
    /// A bulk path or prefix call carried more entries than allowed; the rest were dropped.
    PathLimitExceeded { dropped: usize, limit: usize },
    /// The configured sample rate was outside `[0.0, 1.0]`.
    SampleRateClamped { requested: f64, applied: f64 },
    /// The exporter reported a failure.
    ExportFailed { message: String },
    /// Exporter shutdown did not finish before its deadline.
    ShutdownTimedOut { timeout: Duration },
}

impl Event {
    pub fn level(&self) -> Level {
        match self {
            Event::PathLimitExceeded { .. } | Event::SampleRateClamped { .. } => Level::WARN,
            Event::ExportFailed { .. } | Event::ShutdownTimedOut { .. } => Level::ERROR,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::PathLimitExceeded { dropped, limit } => {
                write!(f, "dropped {dropped} excluded paths beyond the limit of {limit}")
            }
            Event::SampleRateClamped { requested, applied } => {
                write!(f, "sample rate {requested} clamped to {applied}")
            }
            Event::ExportFailed { message } => write!(f, "export failed: {message}"),
            Event::ShutdownTimedOut { timeout } => {
                write!(f, "exporter shutdown timed out after {timeout:?}")
            }
        }
    }
}

pub(crate) fn emit(handler: Option<&EventHandler>, event: &Event) {
    match event.level() {
        Level::ERROR => tracing::error!(%event, "instrumentation event"),
        _ => tracing::warn!(%event, "instrumentation event"),
    }

    if let Some(handler) = handler {
        handler(event);
    }
}
