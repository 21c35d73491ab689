//! # Tracer
//!
//! A `Tracer` is the span factory for one instrumented component. Tracers are
//! created by a [`TracerProvider`] and share that provider's id generator,
//! span limits and export pipeline.
//!
//! Spans started without an explicit parent context use the thread's current
//! [`Context`]: when a span is active there, the new span becomes its child
//! (inheriting the trace id); otherwise the new span starts a fresh trace.

use crate::trace::config::SpanLimits;
use crate::trace::span::{Span, SpanKind, SpanRecord, Status};
use crate::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TracerProvider};
use crate::{common::KeyValue, Context};
use std::borrow::Cow;
use std::fmt;
use std::time::SystemTime;

/// `Tracer` implementation to create and manage spans.
#[derive(Clone)]
pub struct Tracer {
    name: Cow<'static, str>,
    provider: TracerProvider,
}

impl fmt::Debug for Tracer {
    /// Omits `provider` to avoid cycles in output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").field("name", &self.name).finish()
    }
}

impl Tracer {
    pub(crate) fn new(name: Cow<'static, str>, provider: TracerProvider) -> Self {
        Tracer { name, provider }
    }

    /// The name this tracer was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_cow(&self) -> Cow<'static, str> {
        self.name.clone()
    }

    /// Provider this tracer was created by.
    pub(crate) fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    /// Starts a new [`Span`] parented to the current context.
    ///
    /// # Examples
    ///
    /// ```
    /// use reqtrace::trace::TracerProvider;
    ///
    /// let provider = TracerProvider::builder().build();
    /// let tracer = provider.tracer("auth");
    ///
    /// let mut span = tracer.start("create-session-token");
    /// // ... do work ...
    /// span.end().unwrap();
    /// ```
    pub fn start(&self, name: impl Into<Cow<'static, str>>) -> Span {
        Context::map_current(|cx| self.start_with_context(name, cx))
    }

    /// Starts a new [`Span`] with an explicit parent context.
    ///
    /// If `parent_cx` holds an active span (local or extracted from a remote
    /// carrier), the new span inherits its trace id and records it as parent.
    /// Otherwise the new span becomes the root of a fresh trace.
    pub fn start_with_context(
        &self,
        name: impl Into<Cow<'static, str>>,
        parent_cx: &Context,
    ) -> Span {
        self.build_with_context(SpanBuilder::from_name(name), parent_cx)
    }

    /// Creates a [`SpanBuilder`] for configuring a span before starting it.
    pub fn span_builder(&self, name: impl Into<Cow<'static, str>>) -> SpanBuilder {
        SpanBuilder::from_name(name)
    }

    /// Starts a span from a builder and an explicit parent context.
    pub fn build_with_context(&self, mut builder: SpanBuilder, parent_cx: &Context) -> Span {
        let provider = self.provider();
        // No point starting a span if the provider has already shut down.
        if provider.is_shutdown() {
            return Span::new(
                SpanContext::empty_context(),
                None,
                self.clone(),
                SpanLimits::default(),
            );
        }

        let config = provider.config();
        let span_id = config.id_generator.new_span_id();

        let (trace_id, parent_span_id, trace_flags) = if parent_cx.has_active_span() {
            let parent = parent_cx.span();
            let sc = parent.span_context();
            (sc.trace_id(), sc.span_id(), sc.trace_flags())
        } else {
            // Fresh trace root. Sampling strategies are out of scope, so
            // roots are always sampled.
            (
                config.id_generator.new_trace_id(),
                SpanId::INVALID,
                TraceFlags::SAMPLED,
            )
        };

        let span_context = SpanContext::new(trace_id, span_id, trace_flags, false);
        let limits = config.span_limits;

        let start_time = builder.start_time.unwrap_or_else(SystemTime::now);
        let record = SpanRecord {
            parent_span_id,
            kind: builder.kind.take().unwrap_or(SpanKind::Internal),
            name: builder.name,
            start_time,
            end_time: start_time,
            attributes: Vec::new(),
            dropped_attributes_count: 0,
            status: Status::Unset,
        };

        let mut span = Span::new(span_context, Some(record), self.clone(), limits);
        // Attributes go through the span so builder-supplied duplicates
        // collapse under the same last-write-wins rule.
        if let Some(attributes) = builder.attributes.take() {
            span.set_attributes(attributes);
        }
        span
    }
}

/// Everything a span needs to know before it starts.
#[derive(Clone, Debug, Default)]
pub struct SpanBuilder {
    /// The operation name for the span.
    pub name: Cow<'static, str>,
    /// The span kind, `SpanKind::Internal` when unset.
    pub kind: Option<SpanKind>,
    /// Attributes to record at creation.
    pub attributes: Option<Vec<KeyValue>>,
    /// Overrides the start timestamp, `SystemTime::now` when unset.
    pub start_time: Option<SystemTime>,
}

impl SpanBuilder {
    /// Create a new span builder from a span name.
    pub fn from_name(name: impl Into<Cow<'static, str>>) -> Self {
        SpanBuilder {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Specify the span kind.
    pub fn with_kind(self, kind: SpanKind) -> Self {
        SpanBuilder {
            kind: Some(kind),
            ..self
        }
    }

    /// Assign attributes to record at span creation.
    pub fn with_attributes<I>(self, attributes: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        SpanBuilder {
            attributes: Some(attributes.into_iter().collect()),
            ..self
        }
    }

    /// Assign the span start time.
    pub fn with_start_time(self, start_time: SystemTime) -> Self {
        SpanBuilder {
            start_time: Some(start_time),
            ..self
        }
    }

    /// Start the span, parented to the current context.
    pub fn start(self, tracer: &Tracer) -> Span {
        Context::map_current(|cx| tracer.build_with_context(self, cx))
    }

    /// Start the span with an explicit parent context.
    pub fn start_with_context(self, tracer: &Tracer, parent_cx: &Context) -> Span {
        tracer.build_with_context(self, parent_cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{SequentialIdGenerator, TracerProvider};

    fn deterministic_tracer() -> Tracer {
        TracerProvider::builder()
            .with_id_generator(SequentialIdGenerator::new())
            .build()
            .tracer("tracer-tests")
    }

    #[test]
    fn root_span_gets_fresh_trace_id_and_no_parent() {
        let tracer = deterministic_tracer();
        let a = tracer.start_with_context("root-a", &Context::new());
        let b = tracer.start_with_context("root-b", &Context::new());

        assert_ne!(a.span_context().trace_id(), b.span_context().trace_id());
        assert!(a.span_context().is_sampled());

        // Parent ids are unobservable on the open span; verified through
        // export in the span module tests. Validity is observable here.
        assert!(a.span_context().is_valid());
    }

    #[test]
    fn child_inherits_trace_id_and_parent() {
        let tracer = deterministic_tracer();
        let parent = tracer.start_with_context("parent", &Context::new());
        let parent_sc = parent.span_context().clone();

        let cx = Context::new().with_span(parent);
        let child = tracer.start_with_context("child", &cx);

        assert_eq!(child.span_context().trace_id(), parent_sc.trace_id());
        assert_ne!(child.span_context().span_id(), parent_sc.span_id());
    }

    #[test]
    fn start_uses_current_context_as_parent() {
        let tracer = deterministic_tracer();
        let parent = tracer.start_with_context("parent", &Context::new());
        let parent_sc = parent.span_context().clone();

        let _guard = Context::new().with_span(parent).attach();
        let child = tracer.start("child");
        assert_eq!(child.span_context().trace_id(), parent_sc.trace_id());
    }

    #[test]
    fn builder_attributes_deduplicate() {
        let tracer = deterministic_tracer();
        let span = tracer
            .span_builder("with-attrs")
            .with_kind(SpanKind::Server)
            .with_attributes([
                KeyValue::new("url", "/jobs"),
                KeyValue::new("url", "/jobs/42"),
            ])
            .start_with_context(&tracer, &Context::new());
        assert!(span.is_recording());
    }
}
