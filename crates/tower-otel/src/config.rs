use crate::{
    event::{Event, EventHandler},
    filter::FilterBuilder,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Serializable instrumentation settings, for loading from a configuration file.
///
/// Every field is optional. Apply them onto a [`TraceConfig`] or [`MetricsConfig`] builder
/// with [`FilterOptions::apply`]; options set on the builder afterwards still take effect.
///
/// [`TraceConfig`]: crate::trace::TraceConfig
/// [`MetricsConfig`]: crate::metrics::MetricsConfig
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub struct Settings {
    /// Master switch. If unspecified, instrumentation is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Overrides the service name given to the builder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_version: Option<String>,

    /// Fraction of requests to record, clamped to `[0.0, 1.0]`.
    ///
    /// If unspecified, this will default to `1.0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<f64>,

    /// Paths that are never instrumented, matched exactly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_paths: Option<Vec<String>>,

    /// Path prefixes that are never instrumented.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_prefixes: Option<Vec<String>>,

    /// Regular expressions; a path matching any of them is never instrumented.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_patterns: Option<Vec<String>>,

    /// Request headers recorded as attributes. Sensitive headers are always dropped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_headers: Option<Vec<String>>,

    /// Only these query parameters are recorded. If unspecified, every parameter not in
    /// `exclude-params` is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_params: Option<Vec<String>>,

    /// Query parameters that are never recorded, even when listed in `record-params`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_params: Option<Vec<String>>,
}

/// Options shared by the [`TraceConfig`] and [`MetricsConfig`] builders.
///
/// [`TraceConfig`]: crate::trace::TraceConfig
/// [`MetricsConfig`]: crate::metrics::MetricsConfig
pub trait FilterOptions: Sized {
    #[doc(hidden)]
    fn filter_builder_mut(&mut self) -> &mut FilterBuilder;

    /// Turn instrumentation on or off as a whole.
    fn enabled(mut self, enabled: bool) -> Self {
        self.filter_builder_mut().set_enabled(enabled);
        self
    }

    fn service_version(mut self, version: impl Into<String>) -> Self {
        self.filter_builder_mut().set_service_version(version);
        self
    }

    /// Fraction of requests to record. Values outside `[0.0, 1.0]` are clamped when the
    /// config is built and reported as [`Event::SampleRateClamped`].
    fn sample_rate(mut self, rate: f64) -> Self {
        self.filter_builder_mut().set_sample_rate(rate);
        self
    }

    /// Exclude paths by exact match. At most
    /// [`MAX_PATHS_PER_CALL`](crate::filter::MAX_PATHS_PER_CALL) entries are taken per call.
    fn exclude_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.filter_builder_mut().add_paths(paths);
        self
    }

    /// Exclude every path starting with one of `prefixes`. `/debug/` excludes `/debug/vars`
    /// but not `/debug`.
    fn exclude_prefixes<I, P>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.filter_builder_mut().add_prefixes(prefixes);
        self
    }

    /// Exclude every path matching one of `patterns`. Patterns are compiled when the config is
    /// built; an invalid one fails the build.
    fn exclude_patterns<I, P>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.filter_builder_mut().add_patterns(patterns);
        self
    }

    fn exclude_regexes<I>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = Regex>,
    {
        self.filter_builder_mut().add_regexes(patterns);
        self
    }

    fn record_headers<I, N>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        self.filter_builder_mut().add_headers(names);
        self
    }

    fn record_params<I, P>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.filter_builder_mut().add_record_params(names);
        self
    }

    fn exclude_params<I, P>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.filter_builder_mut().add_exclude_params(names);
        self
    }

    /// Receive configuration warnings and exporter failures in addition to the log output.
    fn with_event_handler<H>(mut self, handler: H) -> Self
    where
        H: Fn(&Event) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        self.filter_builder_mut().set_event_handler(handler);
        self
    }

    fn apply(mut self, settings: Settings) -> Self {
        let builder = self.filter_builder_mut();
        if let Some(enabled) = settings.enabled {
            builder.set_enabled(enabled);
        }
        if let Some(name) = settings.service_name {
            builder.set_service_name(name);
        }
        if let Some(version) = settings.service_version {
            builder.set_service_version(version);
        }
        if let Some(rate) = settings.sample_rate {
            builder.set_sample_rate(rate);
        }
        if let Some(paths) = settings.exclude_paths {
            builder.add_paths(paths);
        }
        if let Some(prefixes) = settings.exclude_prefixes {
            builder.add_prefixes(prefixes);
        }
        if let Some(patterns) = settings.exclude_patterns {
            builder.add_patterns(patterns);
        }
        if let Some(headers) = settings.record_headers {
            builder.add_headers(headers);
        }
        if let Some(params) = settings.record_params {
            builder.add_record_params(params);
        }
        if let Some(params) = settings.exclude_params {
            builder.add_exclude_params(params);
        }
        self
    }
}

impl FilterOptions for FilterBuilder {
    fn filter_builder_mut(&mut self) -> &mut FilterBuilder {
        self
    }
}
