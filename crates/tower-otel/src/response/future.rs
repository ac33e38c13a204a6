use super::{EndGuard, InstrumentedBody, OnResponseEnd, ResponseRecorder};
use http::Response;
use pin_project_lite::pin_project;
use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};

pin_project! {
    /// Response future for [`Trace`] and [`Metrics`].
    ///
    /// Wraps the body of the produced response in an [`InstrumentedBody`]. When the inner
    /// service fails, the response is finished as a `500` right away.
    ///
    /// [`Trace`]: crate::trace::Trace
    /// [`Metrics`]: crate::metrics::Metrics
    pub struct ResponseFuture<Fut, F: OnResponseEnd> {
        #[pin]
        inner: Fut,
        pending: Option<Pending<F>>,
    }
}

struct Pending<F: OnResponseEnd> {
    guard: EndGuard<F>,
    counts_bytes: bool,
}

impl<Fut, F: OnResponseEnd> ResponseFuture<Fut, F> {
    /// A future for a request that is not instrumented.
    pub(crate) fn passthrough(inner: Fut) -> Self {
        Self {
            inner,
            pending: None,
        }
    }

    /// `counts_bytes` is set for the outermost layer only, the one that created `recorder`.
    pub(crate) fn instrumented(
        inner: Fut,
        recorder: ResponseRecorder,
        counts_bytes: bool,
        on_end: F,
    ) -> Self {
        Self {
            inner,
            pending: Some(Pending {
                guard: EndGuard::new(recorder, on_end),
                counts_bytes,
            }),
        }
    }
}

impl<Fut, B, E, F> Future for ResponseFuture<Fut, F>
where
    Fut: Future<Output = Result<Response<B>, E>>,
    E: fmt::Display,
    F: OnResponseEnd,
{
    type Output = Result<Response<InstrumentedBody<B, F>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _attached = this
            .pending
            .as_ref()
            .and_then(|pending| pending.guard.context())
            .map(|context| context.clone().attach());

        let result = ready!(this.inner.poll(cx));

        let Some(Pending {
            mut guard,
            counts_bytes,
        }) = this.pending.take()
        else {
            return Poll::Ready(result.map(|response| response.map(InstrumentedBody::passthrough)));
        };

        match result {
            Ok(response) => {
                guard.recorder().write_header(response.status());
                let counter = counts_bytes.then(|| guard.recorder().clone());
                Poll::Ready(Ok(
                    response.map(|body| InstrumentedBody::new(body, counter, guard))
                ))
            }
            Err(error) => {
                guard.fail(&error);
                Poll::Ready(Err(error))
            }
        }
    }
}

impl<Fut, F: OnResponseEnd> fmt::Debug for ResponseFuture<Fut, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("instrumented", &self.pending.is_some())
            .finish_non_exhaustive()
    }
}
