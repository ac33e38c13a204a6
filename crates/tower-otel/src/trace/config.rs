use super::{SpanHandle, SpanState};
use crate::{
    attributes::{
        self, Include, HTTP_REQUEST_ABANDONED, HTTP_RESPONSE_CONTENT_LENGTH, HTTP_STATUS_CODE,
    },
    classify::{Classifier, StatusInRangeAsFailures},
    config::FilterOptions,
    filter::{Decision, FilterBuilder, RequestFilter},
    provider::ExporterLifecycle,
    Error, Result,
};
use http::request::Parts;
use opentelemetry::{
    global,
    trace::{SpanBuilder, SpanKind, Status, TraceContextExt, Tracer, TracerProvider as _},
    Context, KeyValue,
};
use opentelemetry_http::HeaderExtractor;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::{fmt, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Instrumentation scope reported on every span.
pub const TRACER_NAME: &str = "tower-otel";

/// Called after a span is started, before the inner service runs.
pub type StartHook = Arc<dyn Fn(&Context, &SpanHandle, &Parts) + Send + Sync>;

/// Called with the final status code, before the span is ended.
pub type FinishHook = Arc<dyn Fn(&SpanHandle, u16) + Send + Sync>;

/// Object safe view of a [`Tracer`], so the config does not carry the tracer type.
trait StartSpan: Send + Sync {
    fn start_span(&self, builder: SpanBuilder, parent: &Context) -> Context;
}

impl<T> StartSpan for T
where
    T: Tracer + Send + Sync,
    T::Span: Send + Sync + 'static,
{
    fn start_span(&self, builder: SpanBuilder, parent: &Context) -> Context {
        let span = builder.start_with_context(self, parent);
        parent.with_span(span)
    }
}

/// Tracing configuration shared by every request going through a [`TraceLayer`].
///
/// Built once with [`TraceConfig::builder`] and immutable afterwards.
///
/// [`TraceLayer`]: super::TraceLayer
pub struct TraceConfig {
    filter: RequestFilter,
    tracer: Box<dyn StartSpan>,
    classifier: StatusInRangeAsFailures,
    on_start: Option<StartHook>,
    on_finish: Option<FinishHook>,
    lifecycle: ExporterLifecycle,
}

impl TraceConfig {
    pub fn builder(service_name: impl Into<String>) -> TraceConfigBuilder {
        TraceConfigBuilder::new(service_name)
    }

    pub fn filter(&self) -> &RequestFilter {
        &self.filter
    }

    pub fn lifecycle(&self) -> &ExporterLifecycle {
        &self.lifecycle
    }

    /// Decide whether `parts` is traced and, if so, start its span.
    ///
    /// Returns the context to run the request in and a handle to its span. For requests that
    /// are not traced the context is the current one and the handle does nothing; no attribute
    /// is built and no hook runs for them.
    pub fn start(&self, parts: &Parts) -> (Context, SpanHandle) {
        if !self.filter.is_enabled() {
            return (Context::current(), SpanHandle::skipped(SpanState::Excluded));
        }

        if parts
            .extensions
            .get::<CancellationToken>()
            .is_some_and(CancellationToken::is_cancelled)
        {
            debug!(path = parts.uri.path(), "request cancelled before tracing started");
            return (Context::current(), SpanHandle::skipped(SpanState::Cancelled));
        }

        match self.filter.decide(parts.uri.path()) {
            Decision::Excluded => {
                return (Context::current(), SpanHandle::skipped(SpanState::Excluded))
            }
            Decision::NotSampled => {
                return (Context::current(), SpanHandle::skipped(SpanState::NotSampled))
            }
            Decision::Record => {}
        }

        let parent = global::get_text_map_propagator(|propagator| {
            propagator.extract(&HeaderExtractor(&parts.headers))
        });

        let builder = SpanBuilder::from_name(attributes::operation_name(parts))
            .with_kind(SpanKind::Server)
            .with_attributes(attributes::request_attributes(
                &self.filter,
                parts,
                Include::SPAN,
            ));
        let context = self.tracer.start_span(builder, &parent);
        let handle = SpanHandle::open(context.clone());

        if let Some(on_start) = &self.on_start {
            on_start(&context, &handle, parts);
        }

        (context, handle)
    }

    /// Record `status` and end the span.
    ///
    /// Only the first call on a handle has an effect; calls on handles that are not recording
    /// do nothing.
    pub fn finish(&self, handle: &SpanHandle, status: u16) {
        self.finish_response(handle, status, None, None);
    }

    pub(crate) fn finish_response(
        &self,
        handle: &SpanHandle,
        status: u16,
        content_length: Option<u64>,
        error: Option<&dyn fmt::Display>,
    ) {
        let Some(context) = handle.begin_finish() else {
            return;
        };
        let span = context.span();

        span.set_attribute(KeyValue::new(HTTP_STATUS_CODE, i64::from(status)));
        if let Some(length) = content_length {
            span.set_attribute(KeyValue::new(
                HTTP_RESPONSE_CONTENT_LENGTH,
                i64::try_from(length).unwrap_or(i64::MAX),
            ));
        }

        let failure = match error {
            Some(error) => {
                span.add_event(
                    "exception",
                    vec![KeyValue::new("exception.message", error.to_string())],
                );
                Some(self.classifier.classify_error(error))
            }
            None => self.classifier.classify_status(status).err(),
        };
        match failure {
            Some(class) => span.set_status(Status::error(class.to_string())),
            None => span.set_status(Status::Ok),
        }

        if let Some(on_finish) = &self.on_finish {
            on_finish(handle, status);
        }

        handle.end();
    }

    /// End the span of a request dropped before the inner service produced a response.
    ///
    /// No status code is recorded and the span status stays unset; the finish hook does not
    /// run since there is no status to report.
    pub(crate) fn finish_abandoned(&self, handle: &SpanHandle) {
        let Some(context) = handle.begin_finish() else {
            return;
        };
        let span = context.span();
        span.set_attribute(KeyValue::new(HTTP_REQUEST_ABANDONED, true));
        span.add_event("request abandoned", Vec::new());

        handle.end();
    }

    /// Shut down the exporter owned by this config, see [`ExporterLifecycle::shutdown`].
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.lifecycle.shutdown(timeout).await
    }
}

impl fmt::Debug for TraceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceConfig")
            .field("filter", &self.filter)
            .field("classifier", &self.classifier)
            .field("on_start", &self.on_start.is_some())
            .field("on_finish", &self.on_finish.is_some())
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

/// Builder for [`TraceConfig`].
///
/// Filtering options come from [`FilterOptions`].
pub struct TraceConfigBuilder {
    filter: FilterBuilder,
    tracer_provider: Option<SdkTracerProvider>,
    tracer: Option<Box<dyn StartSpan>>,
    classifier: StatusInRangeAsFailures,
    on_start: Option<StartHook>,
    on_finish: Option<FinishHook>,
}

impl TraceConfigBuilder {
    fn new(service_name: impl Into<String>) -> Self {
        Self {
            filter: FilterBuilder::new(service_name),
            tracer_provider: None,
            tracer: None,
            classifier: StatusInRangeAsFailures::default(),
            on_start: None,
            on_finish: None,
        }
    }

    /// Record spans with `provider`. The config then owns its shutdown.
    ///
    /// Mutually exclusive with [`with_tracer`](Self::with_tracer). Without either, the global
    /// tracer provider is used.
    pub fn with_tracer_provider(mut self, provider: SdkTracerProvider) -> Self {
        self.tracer_provider = Some(provider);
        self
    }

    /// Record spans with a tracer the caller owns.
    pub fn with_tracer<T>(mut self, tracer: T) -> Self
    where
        T: Tracer + Send + Sync + 'static,
        T::Span: Send + Sync + 'static,
    {
        self.tracer = Some(Box::new(tracer));
        self
    }

    /// Decide which status codes mark a span as failed. Defaults to `400..=599`.
    pub fn classifier(mut self, classifier: StatusInRangeAsFailures) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn on_start<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, &SpanHandle, &Parts) + Send + Sync + 'static,
    {
        self.on_start = Some(Arc::new(hook));
        self
    }

    pub fn on_finish<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SpanHandle, u16) + Send + Sync + 'static,
    {
        self.on_finish = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<TraceConfig> {
        let event_handler = self.filter.event_handler().cloned();

        let (tracer, lifecycle): (Box<dyn StartSpan>, _) = match (self.tracer_provider, self.tracer)
        {
            (Some(_), Some(_)) => return Err(Error::ConflictingProviders),
            (Some(provider), None) => (
                Box::new(provider.tracer(TRACER_NAME)),
                ExporterLifecycle::with_event_handler(provider, event_handler),
            ),
            (None, Some(tracer)) => (tracer, ExporterLifecycle::noop()),
            (None, None) => (Box::new(global::tracer(TRACER_NAME)), ExporterLifecycle::noop()),
        };

        Ok(TraceConfig {
            filter: self.filter.build()?,
            tracer,
            classifier: self.classifier,
            on_start: self.on_start,
            on_finish: self.on_finish,
            lifecycle,
        })
    }
}

impl FilterOptions for TraceConfigBuilder {
    fn filter_builder_mut(&mut self) -> &mut FilterBuilder {
        &mut self.filter
    }
}

impl fmt::Debug for TraceConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceConfigBuilder")
            .field("filter", &self.filter)
            .field("tracer_provider", &self.tracer_provider.is_some())
            .field("tracer", &self.tracer.is_some())
            .field("classifier", &self.classifier)
            .finish_non_exhaustive()
    }
}
