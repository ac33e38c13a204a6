use super::{Trace, TraceConfig};
use std::sync::Arc;
use tower::Layer;

/// [`Layer`] that records an OpenTelemetry span for every request.
///
/// See the [module docs](crate::trace) for more details.
///
/// [`Layer`]: tower::layer::Layer
#[derive(Debug, Clone)]
pub struct TraceLayer {
    config: Arc<TraceConfig>,
}

impl TraceLayer {
    /// Create a new [`TraceLayer`] from a built [`TraceConfig`].
    pub fn new(config: TraceConfig) -> Self {
        Self::from_shared(Arc::new(config))
    }

    /// Create a new [`TraceLayer`] sharing `config` with other layers, or with the code that
    /// shuts its exporter down.
    pub fn from_shared(config: Arc<TraceConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Arc<TraceConfig> {
        &self.config
    }
}

impl<S> Layer<S> for TraceLayer {
    type Service = Trace<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Trace::new(inner, self.config.clone())
    }
}
