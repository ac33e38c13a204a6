//! Middleware that turns panics in the inner service into `500 Internal Server Error`
//! responses.
//!
//! Place it inside the instrumentation layers, directly around the handler, so a panicking
//! handler still produces a response the tracing and metrics layers can record.

use futures::{future::CatchUnwind, FutureExt};
use http::{Request, Response, StatusCode};
use pin_project_lite::pin_project;
use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    task::{ready, Context, Poll},
};
use tower::{Layer, Service};

/// [`Layer`] that applies the [`CatchPanic`] middleware.
///
/// [`Layer`]: tower::layer::Layer
#[derive(Debug, Clone, Copy, Default)]
pub struct CatchPanicLayer {
    _priv: (),
}

impl CatchPanicLayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S> Layer<S> for CatchPanicLayer {
    type Service = CatchPanic<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CatchPanic { inner }
    }
}

/// Middleware that catches panics in the inner service, both while calling it and while
/// polling its future, and answers with an empty `500` response instead.
#[derive(Debug, Clone, Copy)]
pub struct CatchPanic<S> {
    inner: S,
}

impl<S> CatchPanic<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    /// Gets a reference to the underlying service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Consumes `self`, returning the underlying service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CatchPanic<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Default,
{
    type Response = Response<ResBody>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let kind = match std::panic::catch_unwind(AssertUnwindSafe(|| self.inner.call(req))) {
            Ok(future) => Kind::Future {
                future: AssertUnwindSafe(future).catch_unwind(),
            },
            Err(panic) => Kind::Panicked {
                response: Some(panic_response(panic)),
            },
        };
        ResponseFuture { kind }
    }
}

pin_project! {
    /// Response future for [`CatchPanic`].
    pub struct ResponseFuture<F, B> {
        #[pin]
        kind: Kind<F, B>,
    }
}

pin_project! {
    #[project = KindProj]
    enum Kind<F, B> {
        Future {
            #[pin]
            future: CatchUnwind<AssertUnwindSafe<F>>,
        },
        Panicked {
            response: Option<Response<B>>,
        },
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Default,
{
    type Output = Result<Response<B>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().kind.project() {
            KindProj::Future { future } => match ready!(future.poll(cx)) {
                Ok(result) => Poll::Ready(result),
                Err(panic) => Poll::Ready(Ok(panic_response(panic))),
            },
            KindProj::Panicked { response } => Poll::Ready(Ok(response
                .take()
                .expect("future polled after completion"))),
        }
    }
}

fn panic_response<B: Default>(panic: Box<dyn Any + Send + 'static>) -> Response<B> {
    let message = if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else {
        "unknown panic payload"
    };
    tracing::error!(panic = message, "service panicked");

    let mut response = Response::new(B::default());
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use std::convert::Infallible;
    use tower::{ServiceBuilder, ServiceExt};

    #[tokio::test]
    async fn panic_in_future_becomes_500() {
        let service = ServiceBuilder::new()
            .layer(CatchPanicLayer::new())
            .service_fn(|_: Request<()>| async {
                if true {
                    panic!("handler exploded");
                }
                Ok::<_, Infallible>(Response::new(Full::<Bytes>::default()))
            });

        let response = service.oneshot(Request::new(())).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.into_body().collect().await.unwrap().to_bytes().is_empty());
    }

    #[derive(Clone)]
    struct PanicsOnCall;

    impl Service<Request<()>> for PanicsOnCall {
        type Response = Response<Full<Bytes>>;
        type Error = Infallible;
        type Future = std::future::Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _: Request<()>) -> Self::Future {
            panic!("{}", String::from("panicked before a future existed"));
        }
    }

    #[tokio::test]
    async fn panic_in_call_becomes_500() {
        let response = CatchPanic::new(PanicsOnCall)
            .oneshot(Request::new(()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn normal_responses_are_untouched() {
        let service = ServiceBuilder::new()
            .layer(CatchPanicLayer::new())
            .service_fn(|_: Request<()>| async {
                Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"fine"))))
            });

        let response = service.oneshot(Request::new(())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.into_body().collect().await.unwrap().to_bytes(), "fine");
    }
}
