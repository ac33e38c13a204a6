use super::{Metrics, MetricsConfig};
use std::sync::Arc;
use tower::Layer;

/// [`Layer`] that records request metrics.
///
/// See the [module docs](crate::metrics) for more details.
///
/// [`Layer`]: tower::layer::Layer
#[derive(Debug, Clone)]
pub struct MetricsLayer {
    config: Arc<MetricsConfig>,
}

impl MetricsLayer {
    pub fn new(config: MetricsConfig) -> Self {
        Self::from_shared(Arc::new(config))
    }

    pub fn from_shared(config: Arc<MetricsConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Arc<MetricsConfig> {
        &self.config
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = Metrics<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Metrics::new(inner, self.config.clone())
    }
}
