use super::{SpanHandle, SpanState, TraceConfig, TraceLayer};
use crate::response::{InstrumentedBody, OnResponseEnd, ResponseFuture, ResponseRecorder};
use http::{Request, Response};
use opentelemetry::Context;
use std::{
    fmt,
    sync::Arc,
    task::{Context as TaskContext, Poll},
};
use tower::Service;

/// Middleware that records an OpenTelemetry span for every request.
///
/// See the [module docs](crate::trace) for an example.
#[derive(Debug, Clone)]
pub struct Trace<S> {
    inner: S,
    config: Arc<TraceConfig>,
}

impl<S> Trace<S> {
    /// Create a new [`Trace`].
    pub fn new(inner: S, config: Arc<TraceConfig>) -> Self {
        Self { inner, config }
    }

    /// Returns a new [`Layer`] that wraps services with a [`Trace`] middleware.
    ///
    /// [`Layer`]: tower::layer::Layer
    pub fn layer(config: TraceConfig) -> TraceLayer {
        TraceLayer::new(config)
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

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for Trace<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: fmt::Display,
{
    type Response = Response<InstrumentedBody<ResBody, SpanFinish>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, SpanFinish>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let (mut parts, body) = req.into_parts();
        let (context, handle) = self.config.start(&parts);

        if handle.state() != SpanState::Recording {
            return ResponseFuture::passthrough(self.inner.call(Request::from_parts(parts, body)));
        }

        parts.extensions.insert(handle.clone());

        // An outer instrumentation layer already counts the body; share its recorder.
        let (recorder, counts_bytes) = match ResponseRecorder::from_extensions(&parts.extensions) {
            Some(recorder) => (recorder.clone(), false),
            None => {
                let recorder = ResponseRecorder::new();
                parts.extensions.insert(recorder.clone());
                (recorder, true)
            }
        };

        let future = {
            let _attached = context.attach();
            self.inner.call(Request::from_parts(parts, body))
        };

        ResponseFuture::instrumented(
            future,
            recorder,
            counts_bytes,
            SpanFinish {
                config: self.config.clone(),
                handle,
            },
        )
    }
}

/// Ends the span of a request once its response is complete.
pub struct SpanFinish {
    config: Arc<TraceConfig>,
    handle: SpanHandle,
}

impl OnResponseEnd for SpanFinish {
    fn on_response_end(self, recorder: &ResponseRecorder) {
        self.config.finish_response(
            &self.handle,
            recorder.status(),
            Some(recorder.size()),
            None,
        );
    }

    fn on_service_error(self, recorder: &ResponseRecorder, error: &dyn fmt::Display) {
        self.config.finish_response(
            &self.handle,
            recorder.status(),
            Some(recorder.size()),
            Some(error),
        );
    }

    fn on_abandoned(self, _recorder: &ResponseRecorder) {
        self.config.finish_abandoned(&self.handle);
    }

    fn context(&self) -> Option<&Context> {
        self.handle.context()
    }
}

impl fmt::Debug for SpanFinish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanFinish")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
