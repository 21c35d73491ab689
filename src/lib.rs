//! Request-scoped distributed tracing with wire-level context propagation.
//!
//! `reqtrace` is the tracing core shared by a fleet of HTTP microservices.
//! It does two things:
//!
//! * **Scopes spans to one logical request** even though many concurrent
//!   requests interleave on the same cooperative scheduler. The active span
//!   is carried by a [`Context`] value that travels with each asynchronous
//!   continuation, never through a process-wide slot, so one request's spans
//!   are invisible to another's.
//! * **Stitches traces across services.** A span's identity is encoded into
//!   the outbound request carrier and decoded by the receiving service's
//!   middleware, which continues the trace with its own root span.
//!
//! Finished spans are handed to a pluggable export sink exactly once,
//! fire-and-forget; tracing failures never fail the request being traced.
//!
//! ## In application code
//!
//! ```
//! use reqtrace::global;
//! use reqtrace::middleware::RequestTracing;
//! use reqtrace::trace::{start_child_span, InMemorySpanExporter, TracerProvider};
//! use std::collections::HashMap;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! // Once, at service startup:
//! let provider = TracerProvider::builder()
//!     .with_simple_exporter(InMemorySpanExporter::default())
//!     .with_service_name("auth-service")
//!     .build();
//! global::set_tracer_provider(provider.clone());
//!
//! // At the request boundary:
//! let tracing = RequestTracing::new(global::tracer("auth-service"));
//! let headers: HashMap<String, String> = HashMap::new();
//! let outcome: Result<(), String> = tracing
//!     .serve("/signup", &headers, |_cx| async {
//!         // In the handler:
//!         let mut span = start_child_span("db-call-and-token-creation").unwrap();
//!         // ... create the user, mint the token ...
//!         span.end().unwrap();
//!         Ok(())
//!     })
//!     .await;
//! # outcome.unwrap();
//! # }
//! ```
#![warn(
    future_incompatible,
    missing_debug_implementations,
    missing_docs,
    nonstandard_style,
    rust_2018_idioms,
    unreachable_pub,
    unused
)]
#![allow(clippy::needless_doctest_main)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg), deny(rustdoc::broken_intra_doc_links))]

pub mod common;
mod context;
pub mod global;
pub mod middleware;
pub mod propagation;
pub mod trace;

pub use common::{Key, KeyValue, Value};
pub use context::{
    Context, ContextGuard, FutureContextExt, SinkContextExt, StreamContextExt, WithContext,
};
