//! Tracking the progression of a single request across the services that
//! handle it.
//!
//! A trace is a tree of [`Span`]s, each a timed record of one unit of work
//! with identity, attributes and status. Spans created under an active
//! context become children of that context's span; spans created from an
//! extracted carrier continue a trace started by another service.
//!
//! ## Getting started
//!
//! ```
//! use reqtrace::trace::{InMemorySpanExporter, Status, TracerProvider};
//!
//! let exporter = InMemorySpanExporter::default();
//! let provider = TracerProvider::builder()
//!     .with_simple_exporter(exporter.clone())
//!     .with_service_name("auth-service")
//!     .build();
//!
//! let tracer = provider.tracer("signin");
//! let mut span = tracer.start("verify-credentials");
//! // ... do work ...
//! span.set_status(Status::Ok);
//! span.end().unwrap();
//! ```
//!
//! ## Active spans
//!
//! The active span for the current execution is managed through
//! [`mark_span_as_active`] (synchronous scopes) or
//! [`FutureContextExt::with_context`] (asynchronous continuations), and read
//! back with [`get_active_span`] or [`start_child_span`].
//!
//! [`FutureContextExt::with_context`]: crate::FutureContextExt::with_context

use std::time::Duration;
use thiserror::Error;

mod config;
pub(crate) mod context;
mod export;
mod id_generator;
mod ids;
mod provider;
mod span;
mod span_context;
mod tracer;

pub use self::{
    config::SpanLimits,
    context::{get_active_span, mark_span_as_active, start_child_span, SpanRef, TraceContextExt},
    export::{
        ChannelSpanProcessor, ChannelSpanProcessorBuilder, InMemorySpanExporter,
        SimpleSpanProcessor, SpanData, SpanExporter, SpanProcessor,
    },
    id_generator::{IdGenerator, RandomIdGenerator, SequentialIdGenerator},
    ids::{SpanId, TraceFlags, TraceId},
    provider::{TracerProvider, TracerProviderBuilder},
    span::{Span, SpanKind, Status},
    span_context::SpanContext,
    tracer::{SpanBuilder, Tracer},
};

/// Describe the result of operations in the tracing API.
pub type TraceResult<T> = Result<T, TraceError>;

/// Errors returned by the tracing API.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TraceError {
    /// A span was ended a second time. Ending is a one-shot transition;
    /// repeating it is a programming error at the call site, surfaced rather
    /// than silently rewriting the end timestamp.
    #[error("span has already ended")]
    SpanAlreadyEnded,

    /// An operation required an active locally-created span, and the current
    /// context has none.
    #[error("no active span in the current context")]
    NoActiveSpan,

    /// The provider or processor was already shut down.
    #[error("already shut down")]
    AlreadyShutdown,

    /// Export did not finish within the allowed time.
    #[error("exporting timed out after {} seconds", .0.as_secs())]
    ExportTimedOut(Duration),

    /// Other failures not covered by the variants above.
    #[error("{0}")]
    InternalFailure(String),
}
