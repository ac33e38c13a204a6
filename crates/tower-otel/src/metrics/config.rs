use crate::{
    attributes::{self, Include, HTTP_REQUEST_ABANDONED, HTTP_STATUS_CODE},
    config::FilterOptions,
    filter::{Decision, FilterBuilder, RequestFilter},
    provider::ExporterLifecycle,
    Error, Result,
};
use http::request::Parts;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter, MeterProvider as _, UpDownCounter},
    KeyValue,
};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Instrumentation scope of every instrument.
pub const METER_NAME: &str = "tower-otel";

pub const REQUEST_COUNT: &str = "http.server.request_count";
pub const DURATION: &str = "http.server.duration";
pub const RESPONSE_SIZE: &str = "http.server.response_size";
pub const ACTIVE_REQUESTS: &str = "http.server.active_requests";

#[derive(Clone)]
struct Instruments {
    request_count: Counter<u64>,
    duration: Histogram<f64>,
    response_size: Histogram<u64>,
    active_requests: UpDownCounter<i64>,
}

impl Instruments {
    fn new(meter: &Meter) -> Self {
        Self {
            request_count: meter
                .u64_counter(REQUEST_COUNT)
                .with_description("Number of completed HTTP requests")
                .build(),
            duration: meter
                .f64_histogram(DURATION)
                .with_description("Time from receiving a request to the end of its response")
                .with_unit("s")
                .build(),
            response_size: meter
                .u64_histogram(RESPONSE_SIZE)
                .with_description("Size of response bodies")
                .with_unit("By")
                .build(),
            active_requests: meter
                .i64_up_down_counter(ACTIVE_REQUESTS)
                .with_description("Number of requests being served")
                .build(),
        }
    }
}

/// Per-request metrics state.
///
/// Handles of requests that are not measured do nothing.
#[derive(Clone)]
pub struct MetricsHandle {
    active: Option<Arc<Active>>,
}

struct Active {
    attributes: Vec<KeyValue>,
    start: Instant,
    finished: AtomicBool,
}

impl MetricsHandle {
    fn inactive() -> Self {
        Self { active: None }
    }

    pub fn is_recording(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.finished.load(Ordering::Acquire))
    }

    /// Attributes every measurement of this request carries, besides the status code.
    pub fn attributes(&self) -> &[KeyValue] {
        self.active
            .as_ref()
            .map(|active| active.attributes.as_slice())
            .unwrap_or_default()
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.active.as_ref().map(|active| active.start.elapsed())
    }
}

impl fmt::Debug for MetricsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsHandle")
            .field("recording", &self.is_recording())
            .field("attributes", &self.attributes())
            .finish()
    }
}

/// Metrics configuration shared by every request going through a [`MetricsLayer`].
///
/// [`MetricsLayer`]: super::MetricsLayer
pub struct MetricsConfig {
    filter: RequestFilter,
    instruments: Instruments,
    header_attributes: bool,
    lifecycle: ExporterLifecycle,
}

impl MetricsConfig {
    pub fn builder(service_name: impl Into<String>) -> MetricsConfigBuilder {
        MetricsConfigBuilder::new(service_name)
    }

    pub fn filter(&self) -> &RequestFilter {
        &self.filter
    }

    pub fn lifecycle(&self) -> &ExporterLifecycle {
        &self.lifecycle
    }

    /// Decide whether `parts` is measured and, if so, count it as active.
    pub fn start(&self, parts: &Parts) -> MetricsHandle {
        if !self.filter.is_enabled() {
            return MetricsHandle::inactive();
        }
        if parts
            .extensions
            .get::<CancellationToken>()
            .is_some_and(CancellationToken::is_cancelled)
        {
            debug!(path = parts.uri.path(), "request cancelled before metrics started");
            return MetricsHandle::inactive();
        }
        if self.filter.decide(parts.uri.path()) != Decision::Record {
            return MetricsHandle::inactive();
        }

        // Parameter and header values are unbounded; they need an explicit opt-in. Without a
        // matched route template the raw path would create one series per URL.
        let include = Include {
            url: false,
            raw_route: false,
            user_agent: false,
            params: self.filter.params().has_whitelist(),
            headers: self.header_attributes,
        };
        let attributes = attributes::request_attributes(&self.filter, parts, include);
        self.instruments.active_requests.add(1, &attributes);

        MetricsHandle {
            active: Some(Arc::new(Active {
                attributes,
                start: Instant::now(),
                finished: AtomicBool::new(false),
            })),
        }
    }

    /// Record the completed request. Only the first call on a handle has an effect.
    pub fn finish(&self, handle: &MetricsHandle, status: u16) {
        self.finish_response(handle, status, None);
    }

    pub(crate) fn finish_response(
        &self,
        handle: &MetricsHandle,
        status: u16,
        response_size: Option<u64>,
    ) {
        let Some(active) = self.complete(handle) else {
            return;
        };

        let attributes =
            with_extra(&active.attributes, KeyValue::new(HTTP_STATUS_CODE, i64::from(status)));
        self.instruments.request_count.add(1, &attributes);
        self.instruments
            .duration
            .record(active.start.elapsed().as_secs_f64(), &attributes);
        if let Some(size) = response_size {
            self.instruments.response_size.record(size, &attributes);
        }
    }

    /// Record a request dropped before the inner service produced a response. It is counted
    /// without a status code and has no response size.
    pub(crate) fn finish_abandoned(&self, handle: &MetricsHandle) {
        let Some(active) = self.complete(handle) else {
            return;
        };

        let attributes =
            with_extra(&active.attributes, KeyValue::new(HTTP_REQUEST_ABANDONED, true));
        self.instruments.request_count.add(1, &attributes);
        self.instruments
            .duration
            .record(active.start.elapsed().as_secs_f64(), &attributes);
    }

    /// Marks `handle` finished and leaves the active count. `None` when it was already finished
    /// or never measured.
    fn complete<'a>(&self, handle: &'a MetricsHandle) -> Option<&'a Active> {
        let active = handle.active.as_deref()?;
        active
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        self.instruments.active_requests.add(-1, &active.attributes);
        Some(active)
    }

    /// Shut down the exporter owned by this config, see [`ExporterLifecycle::shutdown`].
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.lifecycle.shutdown(timeout).await
    }
}

fn with_extra(attributes: &[KeyValue], extra: KeyValue) -> Vec<KeyValue> {
    let mut all = Vec::with_capacity(attributes.len() + 1);
    all.extend_from_slice(attributes);
    all.push(extra);
    all
}

impl fmt::Debug for MetricsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsConfig")
            .field("filter", &self.filter)
            .field("header_attributes", &self.header_attributes)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MetricsConfig`].
///
/// Filtering options come from [`FilterOptions`].
pub struct MetricsConfigBuilder {
    filter: FilterBuilder,
    meter_provider: Option<SdkMeterProvider>,
    meter: Option<Meter>,
    header_attributes: bool,
}

impl MetricsConfigBuilder {
    fn new(service_name: impl Into<String>) -> Self {
        Self {
            filter: FilterBuilder::new(service_name),
            meter_provider: None,
            meter: None,
            header_attributes: false,
        }
    }

    /// Record with `provider`. The config then owns its shutdown.
    ///
    /// Mutually exclusive with [`with_meter`](Self::with_meter). Without either, the global
    /// meter provider is used.
    pub fn with_meter_provider(mut self, provider: SdkMeterProvider) -> Self {
        self.meter_provider = Some(provider);
        self
    }

    /// Record with a meter the caller owns.
    pub fn with_meter(mut self, meter: Meter) -> Self {
        self.meter = Some(meter);
        self
    }

    /// Add the configured request headers to every measurement. Off by default: each distinct
    /// header value starts a new time series, so only enable it for headers with few values.
    pub fn with_header_attributes(mut self, enabled: bool) -> Self {
        self.header_attributes = enabled;
        self
    }

    pub fn build(self) -> Result<MetricsConfig> {
        let event_handler = self.filter.event_handler().cloned();

        let (meter, lifecycle) = match (self.meter_provider, self.meter) {
            (Some(_), Some(_)) => return Err(Error::ConflictingProviders),
            (Some(provider), None) => (
                provider.meter(METER_NAME),
                ExporterLifecycle::with_event_handler(provider, event_handler),
            ),
            (None, Some(meter)) => (meter, ExporterLifecycle::noop()),
            (None, None) => (global::meter(METER_NAME), ExporterLifecycle::noop()),
        };

        Ok(MetricsConfig {
            filter: self.filter.build()?,
            instruments: Instruments::new(&meter),
            header_attributes: self.header_attributes,
            lifecycle,
        })
    }
}

impl FilterOptions for MetricsConfigBuilder {
    fn filter_builder_mut(&mut self) -> &mut FilterBuilder {
        &mut self.filter
    }
}

impl fmt::Debug for MetricsConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsConfigBuilder")
            .field("filter", &self.filter)
            .field("meter_provider", &self.meter_provider.is_some())
            .field("meter", &self.meter.is_some())
            .field("header_attributes", &self.header_attributes)
            .finish()
    }
}
