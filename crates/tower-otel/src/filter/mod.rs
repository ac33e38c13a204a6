//! Per-request decisions: is the request instrumented at all, and which of its data may be
//! recorded.
//!
//! A [`RequestFilter`] is assembled once from a [`FilterBuilder`] and then shared read-only by
//! every request. Only the [`Sampler`] counter is mutated afterwards, atomically.

use crate::{
    event::{self, Event, EventHandler},
    Error, Result,
};
use regex::Regex;

pub use self::{
    headers::{is_sensitive, HeaderPolicy, SENSITIVE_HEADERS},
    params::ParameterPolicy,
    path::{compile_patterns, PathFilter, MAX_PATHS_PER_CALL},
    sampling::Sampler,
};

mod headers;
mod params;
mod path;
mod sampling;

/// Outcome of the per-request gate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Instrumentation is disabled or the path is excluded.
    Excluded,
    /// The request passed the path filter but lost the sampling draw.
    NotSampled,
    /// The request is recorded.
    Record,
}

/// Name and version reported as `service.name` / `service.version`.
#[derive(Clone, Debug)]
pub struct ServiceIdentity {
    pub name: String,
    pub version: String,
}

/// Immutable bundle of every per-request policy.
#[derive(Debug)]
pub struct RequestFilter {
    enabled: bool,
    paths: PathFilter,
    params: ParameterPolicy,
    headers: HeaderPolicy,
    sampler: Sampler,
    identity: ServiceIdentity,
}

impl RequestFilter {
    /// Gate a request. The sampler is only consulted for paths that are not excluded, so
    /// excluded traffic never advances the sampling counter.
    pub fn decide(&self, path: &str) -> Decision {
        if !self.enabled || self.paths.should_exclude(path) {
            Decision::Excluded
        } else if !self.sampler.should_sample() {
            Decision::NotSampled
        } else {
            Decision::Record
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn paths(&self) -> &PathFilter {
        &self.paths
    }

    pub fn params(&self) -> &ParameterPolicy {
        &self.params
    }

    pub fn headers(&self) -> &HeaderPolicy {
        &self.headers
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }
}

/// Collects filter options before they are validated into a [`RequestFilter`].
///
/// Options are cheap to set; the expensive and fallible work (regex compilation, header
/// validation) happens in [`FilterBuilder::build`].
#[derive(Clone, Default)]
pub struct FilterBuilder {
    enabled: Option<bool>,
    service_name: String,
    service_version: String,
    sample_rate: Option<f64>,
    paths: Vec<String>,
    prefixes: Vec<String>,
    patterns: Vec<String>,
    compiled_patterns: Vec<Regex>,
    headers: Vec<String>,
    record_params: Option<Vec<String>>,
    exclude_params: Vec<String>,
    event_handler: Option<EventHandler>,
    pending: Vec<Event>,
}

impl std::fmt::Debug for FilterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterBuilder")
            .field("enabled", &self.enabled)
            .field("service_name", &self.service_name)
            .field("service_version", &self.service_version)
            .field("sample_rate", &self.sample_rate)
            .field("paths", &self.paths)
            .field("prefixes", &self.prefixes)
            .field("patterns", &self.patterns)
            .field("headers", &self.headers)
            .field("record_params", &self.record_params)
            .field("exclude_params", &self.exclude_params)
            .finish_non_exhaustive()
    }
}

impl FilterBuilder {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Self::default()
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = Some(enabled);
    }

    pub fn set_service_name(&mut self, name: impl Into<String>) {
        self.service_name = name.into();
    }

    pub fn set_service_version(&mut self, version: impl Into<String>) {
        self.service_version = version.into();
    }

    pub fn set_sample_rate(&mut self, rate: f64) {
        self.sample_rate = Some(rate);
    }

    pub fn add_paths<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let taken = self.capped(paths);
        self.paths.extend(taken);
    }

    pub fn add_prefixes<I, P>(&mut self, prefixes: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let taken = self.capped(prefixes);
        self.prefixes.extend(taken);
    }

    pub fn add_patterns<I, P>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.patterns.extend(patterns.into_iter().map(Into::into));
    }

    pub fn add_regexes<I>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = Regex>,
    {
        self.compiled_patterns.extend(patterns);
    }

    pub fn add_headers<I, N>(&mut self, names: I)
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.headers.extend(names.into_iter().map(Into::into));
    }

    /// Restrict recorded parameters to `names`. A call without any name leaves the policy
    /// untouched, so parameters keep being recorded.
    pub fn add_record_params<I, P>(&mut self, names: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let mut names = names.into_iter().map(Into::into).peekable();
        if names.peek().is_some() {
            self.record_params.get_or_insert_with(Vec::new).extend(names);
        }
    }

    pub fn add_exclude_params<I, P>(&mut self, names: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.exclude_params.extend(names.into_iter().map(Into::into));
    }

    pub fn set_event_handler(&mut self, handler: EventHandler) {
        self.event_handler = Some(handler);
    }

    pub fn event_handler(&self) -> Option<&EventHandler> {
        self.event_handler.as_ref()
    }

    fn capped<I, P>(&mut self, entries: I) -> Vec<String>
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let mut entries = entries.into_iter();
        let taken: Vec<String> = entries
            .by_ref()
            .take(MAX_PATHS_PER_CALL)
            .map(Into::into)
            .collect();
        let dropped = entries.count();
        if dropped > 0 {
            self.pending.push(Event::PathLimitExceeded {
                dropped,
                limit: MAX_PATHS_PER_CALL,
            });
        }
        taken
    }

    pub fn build(self) -> Result<RequestFilter> {
        if self.service_name.trim().is_empty() {
            return Err(Error::EmptyServiceName);
        }

        let mut pending = self.pending;

        let rate = self.sample_rate.unwrap_or(1.0);
        if rate.is_nan() {
            return Err(Error::InvalidSampleRate(rate));
        }
        let sampler = Sampler::new(rate);
        if sampler.rate() != rate {
            pending.push(Event::SampleRateClamped {
                requested: rate,
                applied: sampler.rate(),
            });
        }

        let mut paths = PathFilter::new();
        paths.add_paths(self.paths);
        paths.add_prefixes(self.prefixes);
        paths.add_patterns(compile_patterns(&self.patterns)?);
        paths.add_patterns(self.compiled_patterns);

        let headers = HeaderPolicy::new(&self.headers)?;
        let params = ParameterPolicy::new()
            .with_whitelist(self.record_params)
            .with_blacklist(self.exclude_params);

        for event in &pending {
            event::emit(self.event_handler.as_ref(), event);
        }

        Ok(RequestFilter {
            enabled: self.enabled.unwrap_or(true),
            paths,
            params,
            headers,
            sampler,
            identity: ServiceIdentity {
                name: self.service_name,
                version: self.service_version,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn empty_service_name_is_rejected() {
        let err = FilterBuilder::new("  ").build().unwrap_err();
        assert!(matches!(err, Error::EmptyServiceName));
    }

    #[test]
    fn nan_sample_rate_is_rejected() {
        let mut builder = FilterBuilder::new("svc");
        builder.set_sample_rate(f64::NAN);
        assert!(matches!(
            builder.build().unwrap_err(),
            Error::InvalidSampleRate(_)
        ));
    }

    #[test]
    fn invalid_pattern_fails_the_build() {
        let mut builder = FilterBuilder::new("svc");
        builder.add_patterns(["[invalid"]);
        let err = builder.build().unwrap_err();
        assert!(err.to_string().contains("invalid regex"));
    }

    #[test]
    fn excluded_paths_do_not_consume_samples() {
        let mut builder = FilterBuilder::new("svc");
        builder.add_paths(["/health"]);
        builder.set_sample_rate(1.0);
        let filter = builder.build().unwrap();

        assert_eq!(filter.decide("/health"), Decision::Excluded);
        assert_eq!(filter.decide("/api"), Decision::Record);
    }

    #[test]
    fn disabled_excludes_everything() {
        let mut builder = FilterBuilder::new("svc");
        builder.set_enabled(false);
        let filter = builder.build().unwrap();

        assert_eq!(filter.decide("/api"), Decision::Excluded);
    }

    #[test]
    fn zero_rate_never_records() {
        let mut builder = FilterBuilder::new("svc");
        builder.set_sample_rate(0.0);
        let filter = builder.build().unwrap();

        assert!((0..1000).all(|_| filter.decide("/api") == Decision::NotSampled));
    }

    #[test]
    fn bulk_paths_are_capped_per_call_and_reported() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();

        let mut builder = FilterBuilder::new("svc");
        builder.set_event_handler(Arc::new(move |event: &Event| {
            sink.lock().unwrap().push(event.clone())
        }));
        builder.add_paths((0..1005).map(|i| format!("/p/{i}")));
        builder.add_paths((0..10).map(|i| format!("/q/{i}")));
        let filter = builder.build().unwrap();

        assert!(filter.paths().should_exclude("/p/999"));
        assert!(!filter.paths().should_exclude("/p/1000"));
        assert!(filter.paths().should_exclude("/q/9"));
        assert_eq!(
            *events.lock().unwrap(),
            vec![Event::PathLimitExceeded {
                dropped: 5,
                limit: MAX_PATHS_PER_CALL
            }]
        );
    }

    #[test]
    fn clamped_rate_is_reported() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();

        let mut builder = FilterBuilder::new("svc");
        builder.set_event_handler(Arc::new(move |event: &Event| {
            sink.lock().unwrap().push(event.clone())
        }));
        builder.set_sample_rate(1.5);
        let filter = builder.build().unwrap();

        assert_eq!(filter.sampler().rate(), 1.0);
        assert_eq!(
            *events.lock().unwrap(),
            vec![Event::SampleRateClamped {
                requested: 1.5,
                applied: 1.0
            }]
        );
    }

    #[test]
    fn empty_record_params_call_keeps_recording_everything() {
        let mut builder = FilterBuilder::new("svc");
        builder.add_record_params(Vec::<String>::new());
        let filter = builder.build().unwrap();

        assert!(!filter.params().has_whitelist());
        assert!(filter.params().should_record_param("anything"));
    }
}
