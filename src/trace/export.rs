//! Hand-off of finished spans to the export sink.
//!
//! The core's only obligation to the sink is to call
//! [`SpanExporter::export`] exactly once per finished span, fire-and-forget:
//! export failures are the sink's concern and are never surfaced to request
//! handling. [`SimpleSpanProcessor`] delivers synchronously on the ending
//! thread (tests, debugging); [`ChannelSpanProcessor`] decouples the sink
//! from request latency through a bounded queue and a dedicated drain thread.

use crate::common::KeyValue;
use crate::trace::span::{SpanKind, Status};
use crate::trace::{SpanContext, SpanId, TraceError, TraceResult};
use std::borrow::Cow;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

/// Maximum number of finished spans buffered by a [`ChannelSpanProcessor`].
pub(crate) const REQTRACE_EXPORT_QUEUE_SIZE: &str = "REQTRACE_EXPORT_QUEUE_SIZE";
pub(crate) const DEFAULT_EXPORT_QUEUE_SIZE: usize = 2_048;
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The record of a finished span, as handed to the export sink.
#[derive(Clone, Debug, PartialEq)]
pub struct SpanData {
    /// Trace identity of this span.
    pub span_context: SpanContext,
    /// Id of the parent span, `SpanId::INVALID` for trace roots.
    pub parent_span_id: SpanId,
    /// Span kind.
    pub kind: SpanKind,
    /// Operation name.
    pub name: Cow<'static, str>,
    /// Span start time.
    pub start_time: SystemTime,
    /// Span end time.
    pub end_time: SystemTime,
    /// Recorded attributes, unique by key.
    pub attributes: Vec<KeyValue>,
    /// The number of attribute writes to new keys above the configured cap.
    pub dropped_attributes_count: u32,
    /// Terminal status.
    pub status: Status,
    /// Name of the tracer that created this span.
    pub tracer_name: Cow<'static, str>,
    /// Logical name of the emitting service.
    pub service_name: Cow<'static, str>,
}

impl SpanData {
    /// `true` when this span started a new trace.
    pub fn is_root(&self) -> bool {
        self.parent_span_id == SpanId::INVALID
    }
}

/// The export sink contract.
///
/// Called exactly once per finished span. Implementations own their failure
/// handling; nothing is retried by the core.
pub trait SpanExporter: Send + Sync + fmt::Debug {
    /// Deliver one finished span to the backing collector.
    fn export(&mut self, span: SpanData);

    /// Release any resources held by the exporter.
    fn shutdown(&mut self) {}
}

/// Hooks invoked as spans finish. All tracers created by one provider share
/// the same processors, invoked in registration order.
pub trait SpanProcessor: Send + Sync + fmt::Debug {
    /// Called synchronously within span end with the finished record; must
    /// not block request handling.
    fn on_end(&self, span: SpanData);

    /// Deliver any buffered spans to the exporter, blocking until done.
    fn force_flush(&self) -> TraceResult<()>;

    /// Stop the processor, flushing first. Safe to call multiple times.
    fn shutdown(&self) -> TraceResult<()>;
}

/// A [`SpanProcessor`] that passes finished spans to the exporter as soon as
/// they end, on the ending thread. Typically useful for testing and
/// debugging.
pub struct SimpleSpanProcessor {
    exporter: Mutex<Box<dyn SpanExporter>>,
}

impl SimpleSpanProcessor {
    /// Create a new [`SimpleSpanProcessor`] using the provided exporter.
    pub fn new(exporter: Box<dyn SpanExporter>) -> Self {
        Self {
            exporter: Mutex::new(exporter),
        }
    }
}

impl fmt::Debug for SimpleSpanProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleSpanProcessor").finish()
    }
}

impl SpanProcessor for SimpleSpanProcessor {
    fn on_end(&self, span: SpanData) {
        if !span.span_context.is_sampled() {
            return;
        }

        match self.exporter.lock() {
            Ok(mut exporter) => exporter.export(span),
            Err(_) => tracing::debug!("simple span processor mutex poisoned; span dropped"),
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        // Nothing is buffered.
        Ok(())
    }

    fn shutdown(&self) -> TraceResult<()> {
        match self.exporter.lock() {
            Ok(mut exporter) => {
                exporter.shutdown();
                Ok(())
            }
            Err(_) => Err(TraceError::InternalFailure(
                "simple span processor mutex poisoned at shutdown".into(),
            )),
        }
    }
}

/// Messages exchanged between request threads and the drain thread.
#[derive(Debug)]
enum ExportMessage {
    Span(Box<SpanData>),
    Flush(SyncSender<TraceResult<()>>),
    Shutdown(SyncSender<TraceResult<()>>),
}

/// A [`SpanProcessor`] with a bounded queue and a dedicated drain thread.
///
/// `on_end` never blocks: when the queue is full the span is dropped and
/// counted, so a slow or unavailable sink cannot add latency to request
/// handling. The queue capacity comes from the builder or the
/// `REQTRACE_EXPORT_QUEUE_SIZE` environment variable.
pub struct ChannelSpanProcessor {
    sender: SyncSender<ExportMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    is_shutdown: AtomicBool,
    dropped_spans: Arc<AtomicU64>,
}

impl fmt::Debug for ChannelSpanProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSpanProcessor")
            .field("dropped_spans", &self.dropped_spans.load(Ordering::Relaxed))
            .finish()
    }
}

impl ChannelSpanProcessor {
    /// Create a builder for a [`ChannelSpanProcessor`] draining into
    /// `exporter`.
    pub fn builder<E>(exporter: E) -> ChannelSpanProcessorBuilder<E>
    where
        E: SpanExporter + 'static,
    {
        ChannelSpanProcessorBuilder {
            exporter,
            queue_size: None,
        }
    }

    fn new<E>(mut exporter: E, queue_size: usize) -> Self
    where
        E: SpanExporter + 'static,
    {
        let (sender, receiver) = sync_channel::<ExportMessage>(queue_size);

        let handle = thread::Builder::new()
            .name("reqtrace-export".to_string())
            .spawn(move || loop {
                match receiver.recv_timeout(Duration::from_secs(30)) {
                    Ok(ExportMessage::Span(span)) => exporter.export(*span),
                    Ok(ExportMessage::Flush(ack)) => {
                        // Spans queued before this message have already been
                        // drained in order.
                        let _ = ack.send(Ok(()));
                    }
                    Ok(ExportMessage::Shutdown(ack)) => {
                        exporter.shutdown();
                        let _ = ack.send(Ok(()));
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .ok();

        if handle.is_none() {
            tracing::warn!("failed to spawn export drain thread; spans will be dropped");
        }

        Self {
            sender,
            handle: Mutex::new(handle),
            is_shutdown: AtomicBool::new(false),
            dropped_spans: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of spans dropped because the export queue was full or closed.
    pub fn dropped_span_count(&self) -> u64 {
        self.dropped_spans.load(Ordering::Relaxed)
    }
}

impl SpanProcessor for ChannelSpanProcessor {
    fn on_end(&self, span: SpanData) {
        if !span.span_context.is_sampled() {
            return;
        }
        if self.is_shutdown.load(Ordering::Relaxed) {
            self.dropped_spans.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if let Err(err) = self.sender.try_send(ExportMessage::Span(Box::new(span))) {
            // Emit one warning when dropping starts; afterwards only count.
            if self.dropped_spans.fetch_add(1, Ordering::Relaxed) == 0 {
                let reason = match err {
                    TrySendError::Full(_) => "export queue full",
                    TrySendError::Disconnected(_) => "export drain thread gone",
                };
                tracing::warn!(reason, "dropping finished spans");
            }
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(TraceError::AlreadyShutdown);
        }
        let (ack, done) = sync_channel(1);
        self.sender
            .try_send(ExportMessage::Flush(ack))
            .map_err(|_| TraceError::InternalFailure("failed to send flush message".into()))?;
        done.recv_timeout(FLUSH_TIMEOUT)
            .map_err(|_| TraceError::ExportTimedOut(FLUSH_TIMEOUT))?
    }

    fn shutdown(&self) -> TraceResult<()> {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(TraceError::AlreadyShutdown);
        }
        let (ack, done) = sync_channel(1);
        self.sender
            .try_send(ExportMessage::Shutdown(ack))
            .map_err(|_| TraceError::InternalFailure("failed to send shutdown message".into()))?;
        let result = done
            .recv_timeout(SHUTDOWN_TIMEOUT)
            .map_err(|_| TraceError::ExportTimedOut(SHUTDOWN_TIMEOUT))?;
        if let Ok(mut handle) = self.handle.lock() {
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
        result
    }
}

/// Builder for [`ChannelSpanProcessor`].
#[derive(Debug)]
pub struct ChannelSpanProcessorBuilder<E> {
    exporter: E,
    queue_size: Option<usize>,
}

impl<E> ChannelSpanProcessorBuilder<E>
where
    E: SpanExporter + 'static,
{
    /// Override the queue capacity, taking precedence over
    /// `REQTRACE_EXPORT_QUEUE_SIZE`.
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = Some(queue_size.max(1));
        self
    }

    /// Build the processor, spawning its drain thread.
    pub fn build(self) -> ChannelSpanProcessor {
        let queue_size = self.queue_size.unwrap_or_else(|| {
            env::var(REQTRACE_EXPORT_QUEUE_SIZE)
                .ok()
                .and_then(|value| usize::from_str(&value).ok())
                .filter(|size| *size > 0)
                .unwrap_or(DEFAULT_EXPORT_QUEUE_SIZE)
        });
        ChannelSpanProcessor::new(self.exporter, queue_size)
    }
}

/// An exporter that stores finished spans in memory, for tests and
/// debugging.
///
/// # Examples
///
/// ```
/// use reqtrace::trace::{InMemorySpanExporter, TracerProvider};
///
/// let exporter = InMemorySpanExporter::default();
/// let provider = TracerProvider::builder()
///     .with_simple_exporter(exporter.clone())
///     .build();
///
/// let mut span = provider.tracer("example").start("say-hello");
/// span.end().unwrap();
///
/// assert_eq!(exporter.get_finished_spans().unwrap().len(), 1);
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
}

impl InMemorySpanExporter {
    /// Returns the finished spans exported so far.
    pub fn get_finished_spans(&self) -> TraceResult<Vec<SpanData>> {
        self.spans
            .lock()
            .map(|spans| spans.clone())
            .map_err(|_| TraceError::InternalFailure("failed to lock spans".into()))
    }

    /// Clears the stored spans.
    pub fn reset(&self) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.clear();
        }
    }
}

impl SpanExporter for InMemorySpanExporter {
    fn export(&mut self, span: SpanData) {
        if let Ok(mut spans) = self.spans.lock() {
            spans.push(span);
        }
    }

    fn shutdown(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{TraceFlags, TraceId, TracerProvider};

    fn sample_span_data(name: &'static str) -> SpanData {
        SpanData {
            span_context: SpanContext::new(
                TraceId::from(1u128),
                SpanId::from(1u64),
                TraceFlags::SAMPLED,
                false,
            ),
            parent_span_id: SpanId::INVALID,
            kind: SpanKind::Internal,
            name: name.into(),
            start_time: SystemTime::now(),
            end_time: SystemTime::now(),
            attributes: Vec::new(),
            dropped_attributes_count: 0,
            status: Status::Unset,
            tracer_name: "export-tests".into(),
            service_name: "unknown_service".into(),
        }
    }

    #[test]
    fn channel_processor_delivers_after_flush() {
        let exporter = InMemorySpanExporter::default();
        let processor = ChannelSpanProcessor::builder(exporter.clone())
            .with_queue_size(8)
            .build();

        for _ in 0..3 {
            processor.on_end(sample_span_data("queued"));
        }
        processor.force_flush().unwrap();
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 3);
        processor.shutdown().unwrap();
    }

    #[test]
    fn channel_processor_drops_instead_of_blocking() {
        #[derive(Debug)]
        struct StalledExporter(Mutex<std::sync::mpsc::Receiver<()>>);

        impl SpanExporter for StalledExporter {
            fn export(&mut self, _span: SpanData) {
                // Block until released, simulating an unavailable sink.
                let _ = self.0.lock().unwrap().recv();
            }
        }

        let (release, gate) = std::sync::mpsc::channel();
        let processor = ChannelSpanProcessor::builder(StalledExporter(Mutex::new(gate)))
            .with_queue_size(1)
            .build();

        // First span may be in the exporter, second fills the queue; the
        // rest must be dropped without blocking this thread.
        for _ in 0..8 {
            processor.on_end(sample_span_data("burst"));
        }
        assert!(processor.dropped_span_count() > 0);

        drop(release);
        let _ = processor.shutdown();
    }

    #[test]
    fn channel_processor_shutdown_is_idempotent() {
        let processor = ChannelSpanProcessor::builder(InMemorySpanExporter::default())
            .with_queue_size(4)
            .build();
        assert!(processor.shutdown().is_ok());
        assert!(matches!(
            processor.shutdown(),
            Err(TraceError::AlreadyShutdown)
        ));
    }

    #[test]
    fn unsampled_spans_are_skipped() {
        let exporter = InMemorySpanExporter::default();
        let processor = SimpleSpanProcessor::new(Box::new(exporter.clone()));
        let mut span = sample_span_data("unsampled");
        span.span_context = SpanContext::new(
            TraceId::from(1u128),
            SpanId::from(1u64),
            TraceFlags::NOT_SAMPLED,
            false,
        );
        processor.on_end(span);
        assert!(exporter.get_finished_spans().unwrap().is_empty());
    }

    #[test]
    fn provider_flush_drains_channel_processor() {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder()
            .with_channel_exporter(exporter.clone())
            .build();
        let tracer = provider.tracer("flush");
        tracer.start("first").end().unwrap();
        tracer.start("second").end().unwrap();

        provider.force_flush().unwrap();
        assert_eq!(exporter.get_finished_spans().unwrap().len(), 2);
    }
}
