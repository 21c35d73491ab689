//! Context extensions for tracing.
//!
//! This is the surface request handlers use: reading the active span through
//! [`get_active_span`], starting children of it with [`start_child_span`],
//! and scoping spans with [`mark_span_as_active`] or
//! [`TraceContextExt::with_span`].

use crate::trace::span::Status;
use crate::trace::{Span, SpanContext, TraceError, TraceResult, Tracer};
use crate::{common::KeyValue, Context, ContextGuard};
use std::borrow::Cow;
use std::sync::Mutex;

const NOOP_SPAN: SynchronizedSpan = SynchronizedSpan {
    span_context: SpanContext::NONE,
    tracer: None,
    inner: None,
};

/// A reference to the active span of a context.
#[derive(Debug)]
pub struct SpanRef<'a>(&'a SynchronizedSpan);

/// The active span as stored in a [`Context`]: the immutable identity plus
/// the mutable span body behind synchronization, so concurrent continuations
/// holding clones of one context can all reach the same span.
#[derive(Debug)]
pub(crate) struct SynchronizedSpan {
    /// Immutable span context.
    span_context: SpanContext,
    /// The tracer that created the span; `None` for remote references. The
    /// active tracer is always derived from here, never from ambient global
    /// state.
    tracer: Option<Tracer>,
    /// Mutable span body, present only for locally created spans.
    inner: Option<Mutex<Span>>,
}

impl SynchronizedSpan {
    pub(crate) fn span_context(&self) -> &SpanContext {
        &self.span_context
    }
}

impl From<SpanContext> for SynchronizedSpan {
    fn from(value: SpanContext) -> Self {
        Self {
            span_context: value,
            tracer: None,
            inner: None,
        }
    }
}

impl From<Span> for SynchronizedSpan {
    fn from(value: Span) -> Self {
        Self {
            span_context: value.span_context().clone(),
            tracer: Some(value.tracer().clone()),
            inner: Some(Mutex::new(value)),
        }
    }
}

impl SpanRef<'_> {
    fn with_inner_mut<T>(&self, f: impl FnOnce(&mut Span) -> T) -> Option<T> {
        match self.0.inner.as_ref()?.lock() {
            Ok(mut locked) => Some(f(&mut locked)),
            Err(_) => {
                tracing::warn!("active span lock poisoned; operation skipped");
                None
            }
        }
    }

    /// A reference to the span's [`SpanContext`].
    pub fn span_context(&self) -> &SpanContext {
        &self.0.span_context
    }

    /// Returns `true` if this span is still open and recording.
    ///
    /// Remote span references are never recording.
    pub fn is_recording(&self) -> bool {
        self.with_inner_mut(|span| span.is_recording())
            .unwrap_or(false)
    }

    pub(crate) fn tracer(&self) -> Option<&Tracer> {
        self.0.tracer.as_ref()
    }

    /// Set an attribute of the active span; last write per key wins.
    pub fn set_attribute(&self, attribute: KeyValue) {
        self.with_inner_mut(|span| span.set_attribute(attribute));
    }

    /// Set multiple attributes of the active span.
    pub fn set_attributes(&self, attributes: impl IntoIterator<Item = KeyValue>) {
        self.with_inner_mut(|span| span.set_attributes(attributes));
    }

    /// Sets the status of the active span.
    pub fn set_status(&self, status: Status) {
        self.with_inner_mut(|span| span.set_status(status));
    }

    /// Signals that the operation described by the active span has ended.
    ///
    /// Returns [`TraceError::SpanAlreadyEnded`] when the span was already
    /// ended. On a remote span reference this is a no-op.
    pub fn end(&self) -> TraceResult<()> {
        self.with_inner_mut(|span| span.end()).unwrap_or(Ok(()))
    }

    /// Records `Status::Error(message)` and ends the active span in one
    /// step. See [`Span::end_with_error`].
    pub fn end_with_error(&self, message: impl Into<Cow<'static, str>>) -> TraceResult<()> {
        self.with_inner_mut(|span| span.end_with_error(message))
            .unwrap_or(Ok(()))
    }
}

/// Methods for storing and retrieving trace data in a [`Context`].
pub trait TraceContextExt {
    /// Returns a clone of the current context with the included [`Span`].
    fn current_with_span(span: Span) -> Self;

    /// Returns a clone of this context with the included span.
    ///
    /// # Examples
    ///
    /// ```
    /// use reqtrace::{trace::TraceContextExt, trace::TracerProvider, Context};
    ///
    /// let provider = TracerProvider::builder().build();
    /// let tracer = provider.tracer("jobs");
    ///
    /// let cx = Context::new().with_span(tracer.start("list-jobs"));
    /// let child = tracer.start_with_context("query-jobs", &cx);
    /// # drop(child)
    /// ```
    fn with_span(&self, span: Span) -> Self;

    /// Returns a reference to this context's span, or a no-op reference if
    /// none has been set.
    fn span(&self) -> SpanRef<'_>;

    /// Returns whether an active span has been set.
    fn has_active_span(&self) -> bool;

    /// Returns a copy of this context with the remote span context included,
    /// as produced by carrier extraction.
    fn with_remote_span_context(&self, span_context: SpanContext) -> Self;
}

impl TraceContextExt for Context {
    fn current_with_span(span: Span) -> Self {
        Context::current_with_synchronized_span(span.into())
    }

    fn with_span(&self, span: Span) -> Self {
        self.with_synchronized_span(span.into())
    }

    fn span(&self) -> SpanRef<'_> {
        if let Some(span) = self.span.as_ref() {
            SpanRef(span)
        } else {
            SpanRef(&NOOP_SPAN)
        }
    }

    fn has_active_span(&self) -> bool {
        self.span.is_some()
    }

    fn with_remote_span_context(&self, span_context: SpanContext) -> Self {
        self.with_synchronized_span(span_context.into())
    }
}

/// Mark a given `Span` as active for the duration of the returned guard.
///
/// # Examples
///
/// ```
/// use reqtrace::common::KeyValue;
/// use reqtrace::trace::{get_active_span, mark_span_as_active, TracerProvider};
///
/// let provider = TracerProvider::builder().build();
/// let tracer = provider.tracer("team-members");
///
/// let span = tracer.start("add-member");
/// let _guard = mark_span_as_active(span);
/// // Anything happening in functions called here can reach the span:
/// get_active_span(|span| {
///     span.set_attribute(KeyValue::new("team.id", 7i64));
/// });
/// ```
#[must_use = "Dropping the guard detaches the context."]
pub fn mark_span_as_active(span: Span) -> ContextGuard {
    let cx = Context::current_with_span(span);
    cx.attach()
}

/// Executes a closure with a reference to the current context's active span.
///
/// When no span is active, the closure receives a no-op reference whose
/// span context is invalid.
pub fn get_active_span<F, T>(f: F) -> T
where
    F: FnOnce(SpanRef<'_>) -> T,
{
    Context::map_current(|cx| f(cx.span()))
}

/// Starts a child of the currently active span.
///
/// The tracer is derived from the active span itself, so children always
/// belong to the same instrumented component as their parent. Returns
/// [`TraceError::NoActiveSpan`] when the current context holds no locally
/// created span (a remote reference alone is not enough, since it carries no
/// tracer).
///
/// # Examples
///
/// ```
/// use reqtrace::trace::{mark_span_as_active, start_child_span, TracerProvider};
///
/// let provider = TracerProvider::builder().build();
/// let tracer = provider.tracer("auth");
///
/// let _guard = mark_span_as_active(tracer.start("login"));
/// let mut child = start_child_span("db-call-and-token-creation").unwrap();
/// // ... query the user store, mint the token ...
/// child.end().unwrap();
/// ```
pub fn start_child_span(name: impl Into<Cow<'static, str>>) -> TraceResult<Span> {
    Context::map_current(|cx| match cx.span().tracer() {
        Some(tracer) => Ok(tracer.start_with_context(name, cx)),
        None => Err(TraceError::NoActiveSpan),
    })
}
