//! # Span
//!
//! `Span`s represent a single operation within a trace and nest to form a
//! trace tree. Each trace contains a root span, which typically describes the
//! end-to-end latency of one request, and one or more child spans for its
//! sub-operations.
//!
//! A span's start time is set on creation. While open, its name, attributes
//! and status may change; [`Span::end`] freezes the record and hands it to
//! the export pipeline exactly once. Ending a span a second time is a
//! programming error and is reported as [`TraceError::SpanAlreadyEnded`]
//! rather than silently rewriting the end timestamp.

use crate::common::KeyValue;
use crate::trace::config::SpanLimits;
use crate::trace::export::SpanData;
use crate::trace::{SpanContext, SpanId, TraceError, TraceResult, Tracer};
use std::borrow::Cow;
use std::time::SystemTime;

/// The relationship of a span to the request flow it participates in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpanKind {
    /// Handles an inbound request; root of the local portion of a trace.
    Server,
    /// Times an outbound call to another service.
    Client,
    /// An operation internal to one service, e.g. a database query.
    Internal,
}

/// The terminal disposition of a span.
///
/// Statuses form a total order `Ok > Error > Unset`; an update only takes
/// effect when it outranks the recorded status, so an `Ok` result is never
/// downgraded by a later error report.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    /// The default status.
    #[default]
    Unset,

    /// The operation contains an error.
    Error {
        /// The description of the error
        description: Cow<'static, str>,
    },

    /// The operation has been validated to have completed successfully.
    Ok,
}

impl Status {
    /// Create an error status with the given description.
    pub fn error(description: impl Into<Cow<'static, str>>) -> Self {
        Status::Error {
            description: description.into(),
        }
    }
}

/// Mutable state of an open span.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SpanRecord {
    pub(crate) parent_span_id: SpanId,
    pub(crate) kind: SpanKind,
    pub(crate) name: Cow<'static, str>,
    pub(crate) start_time: SystemTime,
    pub(crate) end_time: SystemTime,
    pub(crate) attributes: Vec<KeyValue>,
    pub(crate) dropped_attributes_count: u32,
    pub(crate) status: Status,
}

#[derive(Debug, Default)]
enum SpanState {
    /// The owning provider was shut down when the span was created; every
    /// operation is a documented no-op, including `end`.
    #[default]
    Disabled,
    Open(Box<SpanRecord>),
    Ended,
}

/// Single operation within a trace.
#[derive(Debug)]
pub struct Span {
    span_context: SpanContext,
    state: SpanState,
    tracer: Tracer,
    limits: SpanLimits,
}

impl Span {
    pub(crate) fn new(
        span_context: SpanContext,
        record: Option<SpanRecord>,
        tracer: Tracer,
        limits: SpanLimits,
    ) -> Self {
        Span {
            span_context,
            state: match record {
                Some(record) => SpanState::Open(Box::new(record)),
                None => SpanState::Disabled,
            },
            tracer,
            limits,
        }
    }

    /// The immutable, propagatable portion of this span.
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    /// Returns `true` while the span is open and recording changes.
    ///
    /// Always `false` after [`Span::end`].
    pub fn is_recording(&self) -> bool {
        matches!(self.state, SpanState::Open(_))
    }

    pub(crate) fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    fn with_record<T>(&mut self, f: impl FnOnce(&mut SpanRecord) -> T) -> Option<T> {
        match &mut self.state {
            SpanState::Open(record) => Some(f(record)),
            _ => None,
        }
    }

    /// Set a single attribute of this span.
    ///
    /// Attribute keys are unique: setting a key that is already present
    /// replaces its value (last write wins). Once the configured attribute
    /// cap is reached, writes to new keys are dropped and counted. Calls on a
    /// finished span are no-ops.
    pub fn set_attribute(&mut self, attribute: KeyValue) {
        let limit = self.limits.max_attributes_per_span as usize;
        self.with_record(|record| record_set_attribute(record, attribute, limit));
    }

    /// Set multiple attributes of this span. See [`Span::set_attribute`].
    pub fn set_attributes(&mut self, attributes: impl IntoIterator<Item = KeyValue>) {
        let limit = self.limits.max_attributes_per_span as usize;
        self.with_record(|record| {
            for attribute in attributes {
                record_set_attribute(record, attribute, limit);
            }
        });
    }

    /// Sets the status of this span.
    ///
    /// Statuses only upgrade (`Ok > Error > Unset`); calls on a finished span
    /// are no-ops.
    pub fn set_status(&mut self, status: Status) {
        self.with_record(|record| {
            if status > record.status {
                record.status = status;
            }
        });
    }

    /// Signals that the operation described by this span has now ended.
    ///
    /// The finished record is handed to the export pipeline exactly once.
    /// Ending an already-finished span returns
    /// [`TraceError::SpanAlreadyEnded`].
    pub fn end(&mut self) -> TraceResult<()> {
        self.end_with_timestamp(SystemTime::now())
    }

    /// Ends this span with the given timestamp. See [`Span::end`].
    pub fn end_with_timestamp(&mut self, timestamp: SystemTime) -> TraceResult<()> {
        match std::mem::take(&mut self.state) {
            SpanState::Open(mut record) => {
                record.end_time = timestamp;
                self.state = SpanState::Ended;
                self.export(*record);
                Ok(())
            }
            SpanState::Ended => {
                self.state = SpanState::Ended;
                tracing::warn!(
                    span_id = %self.span_context.span_id(),
                    trace_id = %self.span_context.trace_id(),
                    "span ended more than once"
                );
                Err(TraceError::SpanAlreadyEnded)
            }
            SpanState::Disabled => Ok(()),
        }
    }

    /// Records `Status::Error(message)` and ends the span in one step.
    ///
    /// The single call every failure branch needs, so failed requests are
    /// visibly distinguished from successful ones in the resulting trace.
    pub fn end_with_error(&mut self, message: impl Into<Cow<'static, str>>) -> TraceResult<()> {
        self.set_status(Status::error(message));
        self.end()
    }

    fn export(&self, record: SpanRecord) {
        let provider = self.tracer.provider();
        if provider.is_shutdown() {
            return;
        }
        match provider.span_processors() {
            [] => {}
            [processor] => processor.on_end(self.build_export_data(record)),
            processors => {
                for processor in processors {
                    processor.on_end(self.build_export_data(record.clone()));
                }
            }
        }
    }

    fn build_export_data(&self, record: SpanRecord) -> SpanData {
        SpanData {
            span_context: self.span_context.clone(),
            parent_span_id: record.parent_span_id,
            kind: record.kind,
            name: record.name,
            start_time: record.start_time,
            end_time: record.end_time,
            attributes: record.attributes,
            dropped_attributes_count: record.dropped_attributes_count,
            status: record.status,
            tracer_name: self.tracer.name_cow(),
            service_name: self.tracer.provider().config().service_name.clone(),
        }
    }
}

impl Drop for Span {
    /// A span dropped while still open is a leak: it is counted on the
    /// provider, force-closed with `Error("aborted")` when no status was
    /// recorded, and exported so it remains visible in the trace.
    fn drop(&mut self) {
        if let SpanState::Open(mut record) = std::mem::take(&mut self.state) {
            self.state = SpanState::Ended;
            let provider = self.tracer.provider();
            if provider.is_shutdown() {
                return;
            }
            provider.mark_leaked();
            tracing::warn!(
                span_id = %self.span_context.span_id(),
                trace_id = %self.span_context.trace_id(),
                name = %record.name,
                "span dropped while still open; force-closing as aborted"
            );
            if record.status == Status::Unset {
                record.status = Status::error("aborted");
            }
            record.end_time = SystemTime::now();
            self.export(*record);
        }
    }
}

fn record_set_attribute(record: &mut SpanRecord, attribute: KeyValue, limit: usize) {
    match record
        .attributes
        .iter()
        .position(|kv| kv.key == attribute.key)
    {
        Some(index) => record.attributes[index].value = attribute.value,
        None if record.attributes.len() < limit => record.attributes.push(attribute),
        None => record.dropped_attributes_count += 1,
    }
}
