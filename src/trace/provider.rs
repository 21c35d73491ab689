//! # Tracer Provider
//!
//! The `TracerProvider` is the central configuration point for tracing in one
//! process: it owns the id generator, span limits, service name and the span
//! processor pipeline, and hands out [`Tracer`] instances that share them.
//!
//! Cloning a provider creates a new reference to the same instance. Dropping
//! the last reference triggers shutdown, which flushes the processors; after
//! shutdown all tracers created from the provider produce disabled spans.

use crate::trace::config::Config;
use crate::trace::export::{
    ChannelSpanProcessor, SimpleSpanProcessor, SpanExporter, SpanProcessor,
};
use crate::trace::id_generator::IdGenerator;
use crate::trace::{SpanLimits, TraceError, TraceResult, Tracer};
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub(crate) struct TracerProviderInner {
    processors: Vec<Box<dyn SpanProcessor>>,
    config: Config,
    is_shutdown: AtomicBool,
    leaked_spans: AtomicU64,
}

impl TracerProviderInner {
    /// Shutdown, called both explicitly and from `Drop` when the last
    /// reference is released.
    fn shutdown(&self) -> Vec<TraceResult<()>> {
        let mut results = Vec::with_capacity(self.processors.len());
        for processor in &self.processors {
            let result = processor.shutdown();
            if let Err(err) = &result {
                tracing::debug!(error = %err, "span processor shutdown error");
            }
            results.push(result);
        }
        results
    }
}

impl Drop for TracerProviderInner {
    fn drop(&mut self) {
        if !self.is_shutdown.load(Ordering::Relaxed) {
            let _ = self.shutdown();
        }
    }
}

/// Creator of [`Tracer`] instances sharing one pipeline configuration.
#[derive(Clone)]
pub struct TracerProvider {
    inner: Arc<TracerProviderInner>,
}

impl fmt::Debug for TracerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracerProvider")
            .field("processors", &self.inner.processors.len())
            .field("is_shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Default for TracerProvider {
    fn default() -> Self {
        TracerProvider::builder().build()
    }
}

impl TracerProvider {
    /// Create a new [`TracerProvider`] builder.
    pub fn builder() -> TracerProviderBuilder {
        TracerProviderBuilder::default()
    }

    /// Returns a [`Tracer`] with the given name, sharing this provider's
    /// configuration and pipeline.
    ///
    /// The process-wide name-to-tracer registry lives in
    /// [`global::tracer`](crate::global::tracer); this constructor is the
    /// factory it is backed by.
    pub fn tracer(&self, name: impl Into<Cow<'static, str>>) -> Tracer {
        let name = name.into();
        if name.is_empty() {
            tracing::debug!("tracer created with an empty name");
        }
        Tracer::new(name, self.clone())
    }

    /// Span processors associated with this provider.
    pub(crate) fn span_processors(&self) -> &[Box<dyn SpanProcessor>] {
        &self.inner.processors
    }

    /// Config associated with this provider.
    pub(crate) fn config(&self) -> &Config {
        &self.inner.config
    }

    /// `true` once the provider has been shut down. Spans are neither started
    /// nor exported afterwards.
    pub(crate) fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_leaked(&self) {
        self.inner.leaked_spans.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of spans that were dropped while still open and had to be
    /// force-closed as aborted.
    ///
    /// A scenario that ends every span it starts leaves this at zero; tests
    /// assert on it to catch unended spans.
    pub fn leaked_span_count(&self) -> u64 {
        self.inner.leaked_spans.load(Ordering::Relaxed)
    }

    /// Force all registered processors to flush buffered spans to their
    /// exporters, blocking until done.
    pub fn force_flush(&self) -> TraceResult<()> {
        let results: Vec<_> = self
            .span_processors()
            .iter()
            .map(|processor| processor.force_flush())
            .collect();
        if results.iter().all(|r| r.is_ok()) {
            Ok(())
        } else {
            Err(TraceError::InternalFailure(format!("errs: {results:?}")))
        }
    }

    /// Shuts down this `TracerProvider`, flushing and stopping all
    /// processors.
    ///
    /// Further calls return [`TraceError::AlreadyShutdown`].
    pub fn shutdown(&self) -> TraceResult<()> {
        if self
            .inner
            .is_shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let results = self.inner.shutdown();
            if results.iter().all(|r| r.is_ok()) {
                Ok(())
            } else {
                Err(TraceError::InternalFailure(format!(
                    "shutdown errors: {:?}",
                    results
                        .into_iter()
                        .filter_map(Result::err)
                        .collect::<Vec<_>>()
                )))
            }
        } else {
            Err(TraceError::AlreadyShutdown)
        }
    }
}

/// Builder for [`TracerProvider`] instances.
#[derive(Debug, Default)]
pub struct TracerProviderBuilder {
    processors: Vec<Box<dyn SpanProcessor>>,
    config: Config,
}

impl TracerProviderBuilder {
    /// Adds a [`SimpleSpanProcessor`] delivering finished spans to `exporter`
    /// synchronously on the ending thread. Useful for tests and debugging.
    ///
    /// Processors are invoked in the order they are added.
    pub fn with_simple_exporter<T: SpanExporter + 'static>(self, exporter: T) -> Self {
        let simple = SimpleSpanProcessor::new(Box::new(exporter));
        self.with_span_processor(simple)
    }

    /// Adds a [`ChannelSpanProcessor`] delivering finished spans to
    /// `exporter` through a bounded queue drained by a dedicated thread, so a
    /// slow or failing sink never blocks request handling.
    pub fn with_channel_exporter<T: SpanExporter + 'static>(self, exporter: T) -> Self {
        let channel = ChannelSpanProcessor::builder(exporter).build();
        self.with_span_processor(channel)
    }

    /// Adds a custom [`SpanProcessor`] to the pipeline.
    pub fn with_span_processor<T: SpanProcessor + 'static>(self, processor: T) -> Self {
        let mut processors = self.processors;
        processors.push(Box::new(processor));

        TracerProviderBuilder { processors, ..self }
    }

    /// Specify the id generator to be used.
    pub fn with_id_generator<T: IdGenerator + 'static>(mut self, id_generator: T) -> Self {
        self.config.id_generator = Box::new(id_generator);
        self
    }

    /// Logical name of this service, stamped on every exported span.
    pub fn with_service_name(mut self, service_name: impl Into<Cow<'static, str>>) -> Self {
        self.config.service_name = service_name.into();
        self
    }

    /// Specify limits for the data recorded on each span.
    pub fn with_span_limits(mut self, span_limits: SpanLimits) -> Self {
        self.config.span_limits = span_limits;
        self
    }

    /// The max number of unique attribute keys kept per span.
    pub fn with_max_attributes_per_span(mut self, max_attributes: u32) -> Self {
        self.config.span_limits.max_attributes_per_span = max_attributes;
        self
    }

    /// Create a new provider from this configuration.
    pub fn build(self) -> TracerProvider {
        TracerProvider {
            inner: Arc::new(TracerProviderInner {
                processors: self.processors,
                config: self.config,
                is_shutdown: AtomicBool::new(false),
                leaked_spans: AtomicU64::new(0),
            }),
        }
    }
}
