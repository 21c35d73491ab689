//! End-to-end request scenarios: carrier stitching across two services,
//! handler failure paths, and abort handling.

use futures_util::task::noop_waker;
use reqtrace::common::KeyValue;
use reqtrace::middleware::{traced_call, RequestTracing};
use reqtrace::trace::{
    get_active_span, start_child_span, InMemorySpanExporter, SpanKind, Status, TracerProvider,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::pin;
use std::task::{Context as TaskContext, Poll};

struct Service {
    exporter: InMemorySpanExporter,
    provider: TracerProvider,
    tracing: RequestTracing,
}

fn service(name: &'static str) -> Service {
    let exporter = InMemorySpanExporter::default();
    let provider = TracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .with_service_name(name)
        .build();
    let tracing = RequestTracing::new(provider.tracer(name));
    Service {
        exporter,
        provider,
        tracing,
    }
}

/// Request A hits service A, which calls downstream into service B. The
/// carrier produced by A's outbound wrapper must let B's middleware continue
/// the same trace.
#[tokio::test(flavor = "current_thread")]
async fn downstream_call_continues_the_trace() {
    let service_a = service("checkout-service");
    let service_b = service("fulfillment-service");

    let inbound: HashMap<String, String> = HashMap::new();
    let b_tracing = service_b.tracing.clone();

    let result: Result<(), String> = service_a
        .tracing
        .serve("/checkout", &inbound, |_cx| async move {
            let outbound: HashMap<String, String> = HashMap::new();
            traced_call("call-fulfillment", outbound, |headers| async move {
                // The downstream service sees only the wire carrier.
                b_tracing
                    .serve("/fulfill", &headers, |_cx| async {
                        get_active_span(|span| {
                            span.set_attribute(KeyValue::new("order.id", 42i64));
                        });
                        Ok(())
                    })
                    .await
            })
            .await
        })
        .await;
    assert!(result.is_ok());

    let a_spans = service_a.exporter.get_finished_spans().unwrap();
    let b_spans = service_b.exporter.get_finished_spans().unwrap();
    assert_eq!(a_spans.len(), 2);
    assert_eq!(b_spans.len(), 1);

    let a_root = a_spans.iter().find(|s| s.name == "/checkout").unwrap();
    let a_client = a_spans
        .iter()
        .find(|s| s.name == "call-fulfillment")
        .unwrap();
    let b_root = &b_spans[0];

    // One end-to-end trace across both services.
    assert_eq!(
        a_client.span_context.trace_id(),
        a_root.span_context.trace_id()
    );
    assert_eq!(
        b_root.span_context.trace_id(),
        a_root.span_context.trace_id()
    );

    // B's root continues from A's client span, not from A's root.
    assert_eq!(b_root.parent_span_id, a_client.span_context.span_id());
    assert_eq!(a_client.parent_span_id, a_root.span_context.span_id());
    assert_eq!(a_client.kind, SpanKind::Client);
    assert_eq!(b_root.kind, SpanKind::Server);
    assert_eq!(b_root.service_name, "fulfillment-service");

    assert_eq!(service_a.provider.leaked_span_count(), 0);
    assert_eq!(service_b.provider.leaked_span_count(), 0);
}

/// Mirror of the login failure path: the handler error-ends its child span
/// and bails; the middleware error-ends the root. Nothing leaks and the
/// child is visibly failed in the export stream.
#[tokio::test(flavor = "current_thread")]
async fn handler_failure_leaves_no_open_spans() {
    let auth = service("auth-service");
    let inbound: HashMap<String, String> = HashMap::new();

    let result: Result<(), String> = auth
        .tracing
        .serve("/login", &inbound, |_cx| async {
            let mut child = start_child_span("db-call-and-token-creation").unwrap();
            // The user lookup comes back empty.
            child.end_with_error("Invalid Credentials").unwrap();
            Err("Invalid Credentials".to_string())
        })
        .await;
    assert!(result.is_err());

    let spans = auth.exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 2);
    assert_eq!(auth.provider.leaked_span_count(), 0);

    for span in &spans {
        match &span.status {
            Status::Error { description } => assert!(!description.is_empty()),
            status => panic!("span {} should be failed, got {status:?}", span.name),
        }
    }
}

/// A request aborted mid-flight (client disconnect drops the future) must
/// not accumulate open spans: the root is force-closed as aborted and the
/// leak is observable.
#[tokio::test(flavor = "current_thread")]
async fn aborted_request_is_force_closed() {
    let api = service("jobs-api");
    let inbound: HashMap<String, String> = HashMap::new();

    {
        let serve = api.tracing.serve("/jobs", &inbound, |_cx| async {
            std::future::pending::<Result<(), String>>().await
        });
        let mut serve = pin!(serve);

        let waker = noop_waker();
        let mut task_cx = TaskContext::from_waker(&waker);
        assert!(matches!(
            serve.as_mut().poll(&mut task_cx),
            Poll::Pending
        ));
        // Dropping the pinned future here is the client disconnect.
    }

    assert_eq!(api.provider.leaked_span_count(), 1);
    let spans = api.exporter.get_finished_spans().unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].name, "/jobs");
    assert_eq!(spans[0].status, Status::error("aborted"));
}

/// Handler attributes recorded before the terminal transition survive into
/// the exported root span.
#[tokio::test(flavor = "current_thread")]
async fn handler_attributes_reach_the_exported_root() {
    let auth = service("auth-service");
    let inbound: HashMap<String, String> = HashMap::new();

    let result: Result<(), String> = auth
        .tracing
        .serve("/register", &inbound, |_cx| async {
            get_active_span(|span| {
                span.set_attributes([
                    KeyValue::new("user.email", "a@example.com"),
                    KeyValue::new("url", "/register"),
                ]);
            });
            Ok(())
        })
        .await;
    assert!(result.is_ok());

    let spans = auth.exporter.get_finished_spans().unwrap();
    let root = &spans[0];
    assert_eq!(root.status, Status::Ok);
    assert!(root
        .attributes
        .iter()
        .any(|kv| kv.key.as_str() == "user.email"));
    assert!(root.attributes.iter().any(|kv| kv.key.as_str() == "url"));
}
