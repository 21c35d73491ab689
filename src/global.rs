//! Process-wide tracing primitives.
//!
//! Services configure tracing once at startup — install a
//! [`TracerProvider`], optionally swap the propagator — and the rest of the
//! codebase obtains named tracers through [`tracer`] without threading the
//! provider through every call site.
//!
//! The name-to-tracer registry is created lazily on first lookup and is
//! idempotent: every lookup of the same name observes the same registration.
//! It is effectively append-only; only installing a new provider resets it,
//! so tracers can never outlive the provider that configured them.
//!
//! # Examples
//!
//! ```
//! use reqtrace::global;
//! use reqtrace::trace::{InMemorySpanExporter, TracerProvider};
//!
//! // In main, during service startup:
//! let provider = TracerProvider::builder()
//!     .with_simple_exporter(InMemorySpanExporter::default())
//!     .with_service_name("jobs-api")
//!     .build();
//! global::set_tracer_provider(provider);
//!
//! // Anywhere else in the codebase:
//! let tracer = global::tracer("jobs");
//! let mut span = tracer.start("list-jobs");
//! span.end().unwrap();
//! ```

use crate::propagation::{TextMapPropagator, TraceContextPropagator};
use crate::trace::{Tracer, TracerProvider};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

/// The currently installed provider.
static GLOBAL_TRACER_PROVIDER: OnceLock<RwLock<TracerProvider>> = OnceLock::new();

/// Process-wide tracer registry, keyed by tracer name.
static TRACER_REGISTRY: OnceLock<RwLock<HashMap<String, Tracer>>> = OnceLock::new();

/// The current global propagator.
static GLOBAL_TEXT_MAP_PROPAGATOR: OnceLock<RwLock<Box<dyn TextMapPropagator + Send + Sync>>> =
    OnceLock::new();

#[inline]
fn global_tracer_provider() -> &'static RwLock<TracerProvider> {
    GLOBAL_TRACER_PROVIDER.get_or_init(|| RwLock::new(TracerProvider::default()))
}

#[inline]
fn tracer_registry() -> &'static RwLock<HashMap<String, Tracer>> {
    TRACER_REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

#[inline]
fn global_text_map_propagator() -> &'static RwLock<Box<dyn TextMapPropagator + Send + Sync>> {
    GLOBAL_TEXT_MAP_PROPAGATOR.get_or_init(|| RwLock::new(Box::new(TraceContextPropagator::new())))
}

/// Sets the given provider as the current global [`TracerProvider`],
/// returning the previous one.
///
/// Registered tracers belong to the provider that created them, so the
/// registry is reset.
pub fn set_tracer_provider(new_provider: TracerProvider) -> TracerProvider {
    if let Ok(mut registry) = tracer_registry().write() {
        registry.clear();
    }
    match global_tracer_provider().write() {
        Ok(mut provider) => std::mem::replace(&mut *provider, new_provider),
        Err(_) => {
            tracing::warn!("global tracer provider lock poisoned; provider not installed");
            new_provider
        }
    }
}

/// Returns a clone of the current global [`TracerProvider`].
pub fn tracer_provider() -> TracerProvider {
    match global_tracer_provider().read() {
        Ok(provider) => provider.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Returns the [`Tracer`] registered under `name`, creating and registering
/// it on first lookup.
pub fn tracer(name: impl Into<Cow<'static, str>>) -> Tracer {
    let name = name.into();
    if let Ok(registry) = tracer_registry().read() {
        if let Some(tracer) = registry.get(name.as_ref()) {
            return tracer.clone();
        }
    }
    match tracer_registry().write() {
        Ok(mut registry) => registry
            .entry(name.to_string())
            .or_insert_with(|| tracer_provider().tracer(name))
            .clone(),
        // Degraded path: hand out an unregistered tracer rather than fail.
        Err(_) => tracer_provider().tracer(name),
    }
}

/// Sets the given [`TextMapPropagator`] as the current global propagator.
pub fn set_text_map_propagator<P: TextMapPropagator + Send + Sync + 'static>(propagator: P) {
    let _ = global_text_map_propagator()
        .write()
        .map(|mut global_propagator| *global_propagator = Box::new(propagator));
}

/// Executes a closure with a reference to the current global propagator.
///
/// The default propagator is [`TraceContextPropagator`].
pub fn get_text_map_propagator<T, F>(mut f: F) -> T
where
    F: FnMut(&dyn TextMapPropagator) -> T,
{
    match global_text_map_propagator().read() {
        Ok(propagator) => f(&**propagator),
        Err(poisoned) => f(&**poisoned.into_inner()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_idempotent() {
        let first = tracer("registry-idempotence");
        let second = tracer("registry-idempotence");
        assert_eq!(first.name(), second.name());

        let registered = tracer_registry()
            .read()
            .map(|registry| {
                registry
                    .keys()
                    .filter(|k| *k == "registry-idempotence")
                    .count()
            })
            .unwrap_or_default();
        assert_eq!(registered, 1);
    }

    #[test]
    fn default_propagator_is_trace_context() {
        get_text_map_propagator(|propagator| {
            assert_eq!(propagator.fields(), &["traceparent"]);
        });
    }
}
