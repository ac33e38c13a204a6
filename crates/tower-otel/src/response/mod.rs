//! Response instrumentation shared by the tracing and metrics middleware.
//!
//! A [`ResponseRecorder`] captures the status code and the number of body bytes of one response.
//! The first instrumentation layer to see a request creates the recorder and puts it in the
//! request extensions; layers further in find it there and reuse it instead of counting the body
//! a second time. Finding a recorder is how a layer knows it is already instrumented.
//!
//! The response body is wrapped in an [`InstrumentedBody`] which forwards every frame untouched
//! and runs an [`OnResponseEnd`] callback exactly once, when the body ends, errors or is
//! dropped. A request whose future is dropped before the inner service produced a response is
//! reported as abandoned, never as a `200`.

use http::{Extensions, StatusCode};
use opentelemetry::Context;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering},
        Arc,
    },
};

pub use self::{body::InstrumentedBody, future::ResponseFuture};

mod body;
mod future;

/// Status code and size of a response, shared between instrumentation layers.
#[derive(Clone, Debug, Default)]
pub struct ResponseRecorder {
    inner: Arc<RecorderState>,
}

#[derive(Debug, Default)]
struct RecorderState {
    status: AtomicU16,
    size: AtomicU64,
    written: AtomicBool,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The recorder installed by an outer instrumentation layer, if any.
    pub fn from_extensions(extensions: &Extensions) -> Option<&ResponseRecorder> {
        extensions.get::<ResponseRecorder>()
    }

    pub fn is_instrumented(extensions: &Extensions) -> bool {
        Self::from_extensions(extensions).is_some()
    }

    /// Record the response status. Only the first call has an effect.
    ///
    /// Returns whether this call set the status.
    pub fn write_header(&self, status: StatusCode) -> bool {
        self.set_status(status.as_u16())
    }

    /// Account for `len` body bytes handed to the transport, defaulting the status to `200` if
    /// none was recorded yet.
    pub fn record_write(&self, len: usize) {
        self.set_status(StatusCode::OK.as_u16());
        self.inner.size.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// The recorded status, `200` when nothing was recorded.
    pub fn status(&self) -> u16 {
        match self.inner.status.load(Ordering::Acquire) {
            0 => StatusCode::OK.as_u16(),
            status => status,
        }
    }

    pub fn size(&self) -> u64 {
        self.inner.size.load(Ordering::Relaxed)
    }

    pub fn is_written(&self) -> bool {
        self.inner.written.load(Ordering::Acquire)
    }

    fn set_status(&self, status: u16) -> bool {
        let applied = self
            .inner
            .status
            .compare_exchange(0, status, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.inner.written.store(true, Ordering::Release);
        applied
    }
}

/// Trait used to tell [`InstrumentedBody`] what to do once a response is complete.
///
/// Exactly one of the three methods is called per request.
pub trait OnResponseEnd {
    /// The response finished: its body ended, failed mid-stream or was dropped.
    fn on_response_end(self, recorder: &ResponseRecorder);

    /// The inner service failed without producing a response.
    fn on_service_error(self, recorder: &ResponseRecorder, error: &dyn fmt::Display);

    /// The request was dropped before the inner service produced a response, e.g. on client
    /// disconnect or an outer timeout. `recorder` holds no status.
    fn on_abandoned(self, recorder: &ResponseRecorder);

    /// Context to enter while the inner service is being polled.
    fn context(&self) -> Option<&Context> {
        None
    }
}

impl OnResponseEnd for () {
    #[inline]
    fn on_response_end(self, _: &ResponseRecorder) {}

    #[inline]
    fn on_service_error(self, _: &ResponseRecorder, _: &dyn fmt::Display) {}

    #[inline]
    fn on_abandoned(self, _: &ResponseRecorder) {}
}

/// Runs its [`OnResponseEnd`] exactly once, at the latest when dropped.
pub(crate) struct EndGuard<F: OnResponseEnd> {
    recorder: ResponseRecorder,
    on_end: Option<F>,
}

impl<F: OnResponseEnd> EndGuard<F> {
    pub(crate) fn new(recorder: ResponseRecorder, on_end: F) -> Self {
        Self {
            recorder,
            on_end: Some(on_end),
        }
    }

    pub(crate) fn recorder(&self) -> &ResponseRecorder {
        &self.recorder
    }

    pub(crate) fn context(&self) -> Option<&Context> {
        self.on_end.as_ref().and_then(OnResponseEnd::context)
    }

    pub(crate) fn fail(&mut self, error: &dyn fmt::Display) {
        if let Some(on_end) = self.on_end.take() {
            self.recorder.write_header(StatusCode::INTERNAL_SERVER_ERROR);
            on_end.on_service_error(&self.recorder, error);
        }
    }

    fn finish(&mut self) {
        if let Some(on_end) = self.on_end.take() {
            if self.recorder.is_written() {
                on_end.on_response_end(&self.recorder);
            } else {
                on_end.on_abandoned(&self.recorder);
            }
        }
    }
}

impl<F: OnResponseEnd> Drop for EndGuard<F> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl<F: OnResponseEnd> fmt::Debug for EndGuard<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndGuard")
            .field("recorder", &self.recorder)
            .field("pending", &self.on_end.is_some())
            .finish()
    }
}
