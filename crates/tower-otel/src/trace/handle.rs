use opentelemetry::{trace::TraceContextExt, Context, KeyValue};
use std::{
    borrow::Cow,
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

/// Where a request stands with respect to tracing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpanState {
    /// Tracing is disabled or the path is excluded.
    Excluded,
    /// The request was cancelled before a span was started.
    Cancelled,
    /// The request lost the sampling draw.
    NotSampled,
    /// A span is open.
    Recording,
    /// The span was ended.
    Finished,
}

const OPEN: u8 = 0;
const FINISHING: u8 = 1;
const ENDED: u8 = 2;

/// Handle to the span of one request.
///
/// Handles of requests that are not recorded accept every call and do nothing, so handlers
/// never need to check before adding data. A recording handle is inserted into the request
/// extensions and can be cloned freely.
#[derive(Clone)]
pub struct SpanHandle {
    repr: Repr,
}

#[derive(Clone)]
enum Repr {
    Skipped(SpanState),
    Open(Arc<Open>),
}

struct Open {
    context: Context,
    stage: AtomicU8,
}

impl SpanHandle {
    pub(crate) fn skipped(state: SpanState) -> Self {
        Self {
            repr: Repr::Skipped(state),
        }
    }

    pub(crate) fn open(context: Context) -> Self {
        Self {
            repr: Repr::Open(Arc::new(Open {
                context,
                stage: AtomicU8::new(OPEN),
            })),
        }
    }

    pub fn state(&self) -> SpanState {
        match &self.repr {
            Repr::Skipped(state) => *state,
            Repr::Open(open) if open.stage.load(Ordering::Acquire) == ENDED => SpanState::Finished,
            Repr::Open(_) => SpanState::Recording,
        }
    }

    /// Whether data added through this handle ends up in a span.
    ///
    /// Stays true while the finish hook runs.
    pub fn is_recording(&self) -> bool {
        match &self.repr {
            Repr::Skipped(_) => false,
            Repr::Open(open) => {
                open.stage.load(Ordering::Acquire) != ENDED && open.context.span().is_recording()
            }
        }
    }

    /// The context carrying the span, for propagating it to outgoing calls.
    pub fn context(&self) -> Option<&Context> {
        match &self.repr {
            Repr::Skipped(_) => None,
            Repr::Open(open) => Some(&open.context),
        }
    }

    pub fn set_attribute(&self, attribute: KeyValue) {
        if let Some(context) = self.live_context() {
            context.span().set_attribute(attribute);
        }
    }

    pub fn add_event<N>(&self, name: N, attributes: Vec<KeyValue>)
    where
        N: Into<Cow<'static, str>>,
    {
        if let Some(context) = self.live_context() {
            context.span().add_event(name, attributes);
        }
    }

    pub fn record_error(&self, error: &dyn std::error::Error) {
        if let Some(context) = self.live_context() {
            context.span().record_error(error);
        }
    }

    fn live_context(&self) -> Option<&Context> {
        match &self.repr {
            Repr::Open(open) if open.stage.load(Ordering::Acquire) != ENDED => Some(&open.context),
            _ => None,
        }
    }

    /// Claim the right to finish the span. Only the first caller gets it.
    pub(crate) fn begin_finish(&self) -> Option<&Context> {
        match &self.repr {
            Repr::Open(open) => open
                .stage
                .compare_exchange(OPEN, FINISHING, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| &open.context),
            Repr::Skipped(_) => None,
        }
    }

    pub(crate) fn end(&self) {
        if let Repr::Open(open) = &self.repr {
            open.context.span().end();
            open.stage.store(ENDED, Ordering::Release);
        }
    }
}

impl fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("SpanHandle");
        debug.field("state", &self.state());
        if let Some(context) = self.context() {
            debug.field("span_context", context.span().span_context());
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skipped_handles_absorb_every_call() {
        let handle = SpanHandle::skipped(SpanState::NotSampled);

        handle.set_attribute(KeyValue::new("k", "v"));
        handle.add_event("event", vec![]);
        handle.record_error(&std::io::Error::new(std::io::ErrorKind::Other, "boom"));

        assert_eq!(handle.state(), SpanState::NotSampled);
        assert!(!handle.is_recording());
        assert!(handle.context().is_none());
        assert!(handle.begin_finish().is_none());
    }

    #[test]
    fn only_the_first_finish_is_granted() {
        let handle = SpanHandle::open(Context::new());
        let clone = handle.clone();

        assert!(handle.begin_finish().is_some());
        assert!(clone.begin_finish().is_none());
        assert_eq!(clone.state(), SpanState::Recording);

        handle.end();
        assert_eq!(clone.state(), SpanState::Finished);
        assert!(!clone.is_recording());
    }
}
