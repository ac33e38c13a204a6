use super::{MetricsConfig, MetricsHandle, MetricsLayer};
use crate::response::{InstrumentedBody, OnResponseEnd, ResponseFuture, ResponseRecorder};
use http::{Request, Response};
use std::{
    fmt,
    sync::Arc,
    task::{Context, Poll},
};
use tower::Service;

/// Middleware that records request metrics.
#[derive(Debug, Clone)]
pub struct Metrics<S> {
    inner: S,
    config: Arc<MetricsConfig>,
}

impl<S> Metrics<S> {
    pub fn new(inner: S, config: Arc<MetricsConfig>) -> Self {
        Self { inner, config }
    }

    pub fn layer(config: MetricsConfig) -> MetricsLayer {
        MetricsLayer::new(config)
    }

    /// Gets a reference to the underlying service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Gets a mutable reference to the underlying service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes `self`, returning the underlying service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for Metrics<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: fmt::Display,
{
    type Response = Response<InstrumentedBody<ResBody, MetricsFinish>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, MetricsFinish>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let (mut parts, body) = req.into_parts();
        let handle = self.config.start(&parts);

        if !handle.is_recording() {
            return ResponseFuture::passthrough(self.inner.call(Request::from_parts(parts, body)));
        }

        let (recorder, counts_bytes) = match ResponseRecorder::from_extensions(&parts.extensions) {
            Some(recorder) => (recorder.clone(), false),
            None => {
                let recorder = ResponseRecorder::new();
                parts.extensions.insert(recorder.clone());
                (recorder, true)
            }
        };

        ResponseFuture::instrumented(
            self.inner.call(Request::from_parts(parts, body)),
            recorder,
            counts_bytes,
            MetricsFinish {
                config: self.config.clone(),
                handle,
            },
        )
    }
}

/// Records the metrics of a request once its response is complete.
pub struct MetricsFinish {
    config: Arc<MetricsConfig>,
    handle: MetricsHandle,
}

impl OnResponseEnd for MetricsFinish {
    fn on_response_end(self, recorder: &ResponseRecorder) {
        self.config
            .finish_response(&self.handle, recorder.status(), Some(recorder.size()));
    }

    fn on_service_error(self, recorder: &ResponseRecorder, _error: &dyn fmt::Display) {
        self.config
            .finish_response(&self.handle, recorder.status(), Some(recorder.size()));
    }

    fn on_abandoned(self, _recorder: &ResponseRecorder) {
        self.config.finish_abandoned(&self.handle);
    }
}

impl fmt::Debug for MetricsFinish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsFinish")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
