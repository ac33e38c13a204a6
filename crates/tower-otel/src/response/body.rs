use super::{EndGuard, OnResponseEnd, ResponseRecorder};
use bytes::Buf;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use std::{
    fmt,
    pin::Pin,
    task::{ready, Context, Poll},
};

pin_project! {
    /// Response body wrapper that counts bytes into a [`ResponseRecorder`] and fires an
    /// [`OnResponseEnd`] once the body is done.
    ///
    /// Frames are forwarded as soon as they are polled, `is_end_stream` and `size_hint` are
    /// answered by the wrapped body, and response extensions (including upgrade handles) are
    /// never touched.
    pub struct InstrumentedBody<B, F: OnResponseEnd> {
        #[pin]
        inner: B,
        counter: Option<ResponseRecorder>,
        guard: Option<EndGuard<F>>,
    }
}

impl<B, F: OnResponseEnd> InstrumentedBody<B, F> {
    pub(crate) fn new(inner: B, counter: Option<ResponseRecorder>, guard: EndGuard<F>) -> Self {
        Self {
            inner,
            counter,
            guard: Some(guard),
        }
    }

    /// A body that is forwarded without any accounting.
    pub fn passthrough(inner: B) -> Self {
        Self {
            inner,
            counter: None,
            guard: None,
        }
    }

    /// Whether this body records anything.
    pub fn is_instrumented(&self) -> bool {
        self.counter.is_some() || self.guard.is_some()
    }

    /// Gets a reference to the wrapped body.
    pub fn get_ref(&self) -> &B {
        &self.inner
    }

    /// Gets a mutable reference to the wrapped body.
    pub fn get_mut(&mut self) -> &mut B {
        &mut self.inner
    }

    /// Consumes `self`, returning the wrapped body. The response is considered finished.
    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B, F> Body for InstrumentedBody<B, F>
where
    B: Body,
    B::Error: fmt::Display,
    F: OnResponseEnd,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let result = ready!(this.inner.poll_frame(cx));

        match &result {
            Some(Ok(frame)) => {
                if let (Some(counter), Some(data)) = (this.counter.as_ref(), frame.data_ref()) {
                    counter.record_write(data.remaining());
                }
            }
            Some(Err(error)) => {
                tracing::debug!(%error, "response body failed");
                if let Some(mut guard) = this.guard.take() {
                    guard.fail(error);
                }
            }
            None => {
                // dropping the guard finishes the response
                this.guard.take();
            }
        }

        Poll::Ready(result)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B: fmt::Debug, F: OnResponseEnd> fmt::Debug for InstrumentedBody<B, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentedBody")
            .field("inner", &self.inner)
            .field("counter", &self.counter)
            .field("guard", &self.guard)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http::StatusCode;
    use http_body_util::{BodyExt, Full, StreamBody};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Seen(Arc<Mutex<Vec<String>>>);

    impl OnResponseEnd for Seen {
        fn on_response_end(self, recorder: &ResponseRecorder) {
            self.0
                .lock()
                .unwrap()
                .push(format!("end {} {}", recorder.status(), recorder.size()));
        }

        fn on_service_error(self, recorder: &ResponseRecorder, error: &dyn fmt::Display) {
            self.0
                .lock()
                .unwrap()
                .push(format!("error {} {error}", recorder.status()));
        }

        fn on_abandoned(self, _: &ResponseRecorder) {
            self.0.lock().unwrap().push("abandoned".to_owned());
        }
    }

    #[tokio::test]
    async fn counts_bytes_and_finishes_once() {
        let seen = Seen::default();
        let recorder = ResponseRecorder::new();
        let body = InstrumentedBody::new(
            Full::new(Bytes::from_static(b"hello world")),
            Some(recorder.clone()),
            EndGuard::new(recorder.clone(), seen.clone()),
        );

        let collected = body.collect().await.unwrap().to_bytes();

        assert_eq!(collected, "hello world");
        assert_eq!(recorder.size(), 11);
        assert_eq!(*seen.0.lock().unwrap(), ["end 200 11"]);
    }

    #[tokio::test]
    async fn shared_recorder_is_not_counted_twice() {
        let seen = Seen::default();
        let recorder = ResponseRecorder::new();
        recorder.write_header(StatusCode::CREATED);

        // outer layer owns the counting, inner layer only observes
        let inner = InstrumentedBody::new(
            Full::new(Bytes::from_static(b"abcd")),
            None,
            EndGuard::new(recorder.clone(), seen.clone()),
        );
        let outer = InstrumentedBody::new(
            inner,
            Some(recorder.clone()),
            EndGuard::new(recorder.clone(), seen.clone()),
        );

        outer.collect().await.unwrap();

        assert_eq!(recorder.size(), 4);
        assert_eq!(*seen.0.lock().unwrap(), ["end 201 4", "end 201 4"]);
    }

    #[tokio::test]
    async fn dropping_the_body_finishes() {
        let seen = Seen::default();
        let recorder = ResponseRecorder::new();
        recorder.write_header(StatusCode::OK);
        let body = InstrumentedBody::new(
            Full::new(Bytes::from_static(b"unread")),
            Some(recorder.clone()),
            EndGuard::new(recorder, seen.clone()),
        );
        assert!(body.is_instrumented());

        drop(body);

        assert_eq!(*seen.0.lock().unwrap(), ["end 200 0"]);
    }

    #[tokio::test]
    async fn body_error_fails_the_response() {
        let seen = Seen::default();
        let recorder = ResponseRecorder::new();
        let frames = futures::stream::iter(vec![
            Ok(Frame::data(Bytes::from_static(b"partial"))),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "reset")),
        ]);
        let body = InstrumentedBody::new(
            StreamBody::new(frames),
            Some(recorder.clone()),
            EndGuard::new(recorder.clone(), seen.clone()),
        );

        assert!(body.collect().await.is_err());

        assert_eq!(recorder.size(), 7);
        // status was already committed by the first frame
        assert_eq!(*seen.0.lock().unwrap(), ["error 200 reset"]);
    }

    #[test]
    fn passthrough_forwards_hints() {
        let body: InstrumentedBody<_, ()> =
            InstrumentedBody::passthrough(Full::new(Bytes::from_static(b"12345")));

        assert!(!body.is_instrumented());
        assert!(!body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(5));
        assert_eq!(body.get_ref().size_hint().exact(), Some(5));
        assert_eq!(body.into_inner().size_hint().exact(), Some(5));
    }
}
