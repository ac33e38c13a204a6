//! Exporter client lifecycle.
//!
//! Instrumentation does not talk to an exporter directly; it only needs to flush and stop
//! whatever provider backs its tracer or meter when the application exits. [`ExporterClient`]
//! is that narrow seam and [`ExporterLifecycle`] runs its shutdown exactly once.

use crate::{
    event::{self, Event, EventHandler},
    BoxError, Error, Result,
};
use opentelemetry_sdk::{metrics::SdkMeterProvider, trace::SdkTracerProvider};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, info};

/// Something that buffers telemetry and has to be shut down to flush it.
///
/// `shutdown` may block; [`ExporterLifecycle`] runs it on the blocking thread pool.
pub trait ExporterClient: Send + Sync + 'static {
    fn shutdown(&self) -> Result<(), BoxError>;
}

impl ExporterClient for SdkTracerProvider {
    fn shutdown(&self) -> Result<(), BoxError> {
        SdkTracerProvider::shutdown(self).map_err(Into::into)
    }
}

impl ExporterClient for SdkMeterProvider {
    fn shutdown(&self) -> Result<(), BoxError> {
        SdkMeterProvider::shutdown(self).map_err(Into::into)
    }
}

/// Client used when instrumentation records through the global provider or a caller-owned
/// tracer. The application owns that provider, so there is nothing to shut down here.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopExporter;

impl ExporterClient for NoopExporter {
    fn shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Owns an [`ExporterClient`] and shuts it down at most once.
#[derive(Clone)]
pub struct ExporterLifecycle {
    inner: Arc<Inner>,
}

struct Inner {
    client: Arc<dyn ExporterClient>,
    shut_down: AtomicBool,
    event_handler: Option<EventHandler>,
}

impl ExporterLifecycle {
    pub fn new<C: ExporterClient>(client: C) -> Self {
        Self::with_event_handler(client, None)
    }

    pub fn noop() -> Self {
        Self::new(NoopExporter)
    }

    pub(crate) fn with_event_handler<C: ExporterClient>(
        client: C,
        event_handler: Option<EventHandler>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client: Arc::new(client),
                shut_down: AtomicBool::new(false),
                event_handler,
            }),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Flush and stop the exporter, waiting at most `timeout`.
    ///
    /// Only the first call does any work, concurrent or later calls return `Ok(())` right away.
    /// Failures are reported to the event handler and returned; they never affect request
    /// handling.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        if self
            .inner
            .shut_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("exporter already shut down");
            return Ok(());
        }

        let client = self.inner.client.clone();
        let task = tokio::task::spawn_blocking(move || client.shutdown());

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(()))) => {
                info!("exporter shut down");
                Ok(())
            }
            Ok(Ok(Err(error))) => {
                self.emit(Event::ExportFailed {
                    message: error.to_string(),
                });
                Err(Error::Shutdown(error))
            }
            Ok(Err(join_error)) => {
                self.emit(Event::ExportFailed {
                    message: join_error.to_string(),
                });
                Err(Error::Shutdown(join_error.into()))
            }
            Err(_elapsed) => {
                self.emit(Event::ShutdownTimedOut { timeout });
                Err(Error::ShutdownTimeout(timeout))
            }
        }
    }

    fn emit(&self, event: Event) {
        event::emit(self.inner.event_handler.as_ref(), &event);
    }
}

impl fmt::Debug for ExporterLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExporterLifecycle")
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{atomic::AtomicUsize, Mutex};

    #[derive(Clone, Default)]
    struct CountingClient {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        fail: bool,
    }

    impl ExporterClient for CountingClient {
        fn shutdown(&self) -> Result<(), BoxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            if self.fail {
                Err("collector unreachable".into())
            } else {
                Ok(())
            }
        }
    }

    fn recording_handler() -> (EventHandler, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let handler: EventHandler = Arc::new(move |event: &Event| {
            sink.lock().unwrap().push(event.clone());
        });
        (handler, events)
    }

    #[tokio::test]
    async fn shutdown_runs_exactly_once_under_concurrency() {
        let client = CountingClient {
            delay: Duration::from_millis(20),
            ..Default::default()
        };
        let calls = client.calls.clone();
        let lifecycle = ExporterLifecycle::new(client);

        let handles = (0..16)
            .map(|_| {
                let lifecycle = lifecycle.clone();
                tokio::spawn(async move { lifecycle.shutdown(Duration::from_secs(5)).await })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(lifecycle.is_shut_down());
    }

    #[tokio::test]
    async fn failures_are_reported_and_returned() {
        let (handler, events) = recording_handler();
        let client = CountingClient {
            fail: true,
            ..Default::default()
        };
        let lifecycle = ExporterLifecycle::with_event_handler(client, Some(handler));

        let err = lifecycle.shutdown(Duration::from_secs(5)).await.unwrap_err();

        assert!(matches!(err, Error::Shutdown(_)));
        assert_eq!(
            *events.lock().unwrap(),
            vec![Event::ExportFailed {
                message: "collector unreachable".to_owned()
            }]
        );
        // a failed shutdown is still not retried
        lifecycle.shutdown(Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn deadline_is_honoured() {
        let (handler, events) = recording_handler();
        let client = CountingClient {
            delay: Duration::from_millis(500),
            ..Default::default()
        };
        let lifecycle = ExporterLifecycle::with_event_handler(client, Some(handler));
        let timeout = Duration::from_millis(10);

        let err = lifecycle.shutdown(timeout).await.unwrap_err();

        assert!(matches!(err, Error::ShutdownTimeout(t) if t == timeout));
        assert_eq!(
            *events.lock().unwrap(),
            vec![Event::ShutdownTimedOut { timeout }]
        );
    }

    #[tokio::test]
    async fn sdk_providers_shut_down() {
        let tracer_provider = SdkTracerProvider::builder().build();
        ExporterLifecycle::new(tracer_provider)
            .shutdown(Duration::from_secs(5))
            .await
            .unwrap();

        let meter_provider = SdkMeterProvider::builder().build();
        ExporterLifecycle::new(meter_provider)
            .shutdown(Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn noop_is_always_fine() {
        ExporterLifecycle::noop()
            .shutdown(Duration::from_millis(1))
            .await
            .unwrap();
    }
}
