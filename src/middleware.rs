//! Request-boundary integration.
//!
//! [`RequestTracing`] sits at the inbound edge of a service: it continues (or
//! starts) a trace from the request carrier, keeps the root span active for
//! the whole asynchronous handler chain, and guarantees the root span ends
//! exactly once, with an error status on failed requests.
//!
//! [`traced_call`] sits at the outbound edge: it times the local side of a
//! downstream call in a child span, writes that span's identity into the
//! outgoing carrier so the next service can continue the trace, and records
//! transport failures on the span without altering them.
//!
//! Tracing is best-effort observability: nothing in this module changes the
//! handler's or the call's own success or error behavior.

use crate::global;
use crate::propagation::{Extractor, Injector, TextMapPropagator};
use crate::trace::{SpanKind, Status, TraceContextExt, Tracer};
use crate::{Context, FutureContextExt};
use std::borrow::Cow;
use std::fmt;
use std::future::Future;

/// Request-scoping middleware for one service.
///
/// # Examples
///
/// ```
/// use reqtrace::middleware::RequestTracing;
/// use reqtrace::trace::{get_active_span, InMemorySpanExporter, TracerProvider};
/// use reqtrace::common::KeyValue;
/// use std::collections::HashMap;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let provider = TracerProvider::builder()
///     .with_simple_exporter(InMemorySpanExporter::default())
///     .build();
/// let tracing = RequestTracing::new(provider.tracer("auth-service"));
///
/// let headers: HashMap<String, String> = HashMap::new();
/// let result: Result<&str, String> = tracing
///     .serve("/login", &headers, |_cx| async {
///         get_active_span(|span| {
///             span.set_attribute(KeyValue::new("user.email", "a@example.com"));
///         });
///         Ok("welcome")
///     })
///     .await;
/// assert_eq!(result, Ok("welcome"));
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct RequestTracing {
    tracer: Tracer,
}

impl RequestTracing {
    /// Create middleware that starts request roots from `tracer`.
    pub fn new(tracer: Tracer) -> Self {
        RequestTracing { tracer }
    }

    /// Handles one inbound request.
    ///
    /// Extracts any remote parent from `carrier`, starts the root span named
    /// after the route, and runs `handler` with that span active across all
    /// of its asynchronous continuations. The handler receives the request
    /// [`Context`] for explicit propagation into spawned work.
    ///
    /// The root span is ended exactly once by this method: with
    /// `Status::Ok` on success, or via the error path with the handler
    /// error's message. If the returned future is dropped before completing
    /// (e.g. client disconnect), the root span is force-closed as aborted
    /// and counted as a leak on the provider.
    pub async fn serve<F, Fut, T, E>(
        &self,
        route: impl Into<Cow<'static, str>>,
        carrier: &dyn Extractor,
        handler: F,
    ) -> Result<T, E>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let parent_cx = global::get_text_map_propagator(|propagator| {
            propagator.extract_with_context(&Context::new(), carrier)
        });
        let span = self
            .tracer
            .span_builder(route)
            .with_kind(SpanKind::Server)
            .start_with_context(&self.tracer, &parent_cx);
        let cx = parent_cx.with_span(span);

        let result = handler(cx.clone()).with_context(cx.clone()).await;

        let ended = match &result {
            Ok(_) => {
                cx.span().set_status(Status::Ok);
                cx.span().end()
            }
            Err(err) => cx.span().end_with_error(err.to_string()),
        };
        if let Err(err) = ended {
            // The handler ended the root span itself; the middleware owns
            // that transition.
            tracing::warn!(error = %err, "request root span was not open at request end");
        }

        result
    }
}

/// Wraps one outbound downstream call.
///
/// Starts a `SpanKind::Client` child of the currently active span, injects
/// the child's identity into `carrier`, and hands the carrier to `call` to
/// attach as outbound transport metadata. The child span is ended after the
/// call returns — with an error status carrying the transport error message
/// on failure — and the call result is returned unchanged. No retries are
/// made; retry policy belongs to the caller.
///
/// When no span is active the call simply runs untraced with the carrier as
/// given; a missing tracing setup must never break an outbound call.
///
/// # Examples
///
/// ```
/// use reqtrace::middleware::{traced_call, RequestTracing};
/// use reqtrace::trace::{InMemorySpanExporter, TracerProvider};
/// use std::collections::HashMap;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let provider = TracerProvider::builder()
///     .with_simple_exporter(InMemorySpanExporter::default())
///     .build();
/// let tracing = RequestTracing::new(provider.tracer("team-service"));
///
/// let inbound: HashMap<String, String> = HashMap::new();
/// let _: Result<(), String> = tracing
///     .serve("/teams", &inbound, |_cx| async {
///         let outbound: HashMap<String, String> = HashMap::new();
///         traced_call("membership-lookup", outbound, |headers| async move {
///             // issue the downstream request with `headers` attached
///             assert!(headers.contains_key("traceparent"));
///             Ok(())
///         })
///         .await
///     })
///     .await;
/// # }
/// ```
pub async fn traced_call<C, F, Fut, T, E>(
    name: impl Into<Cow<'static, str>>,
    mut carrier: C,
    call: F,
) -> Result<T, E>
where
    C: Injector,
    F: FnOnce(C) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let parent_cx = Context::current();
    let tracer = parent_cx.span().tracer().cloned();
    let span = match tracer {
        Some(tracer) => tracer
            .span_builder(name)
            .with_kind(SpanKind::Client)
            .start_with_context(&tracer, &parent_cx),
        None => return call(carrier).await,
    };
    let cx = parent_cx.with_span(span);

    global::get_text_map_propagator(|propagator| propagator.inject_context(&cx, &mut carrier));

    let result = call(carrier).with_context(cx.clone()).await;

    let ended = match &result {
        Ok(_) => {
            cx.span().set_status(Status::Ok);
            cx.span().end()
        }
        Err(err) => cx.span().end_with_error(err.to_string()),
    };
    if let Err(err) = ended {
        tracing::warn!(error = %err, "outbound call span was not open after the call");
    }

    result
}
