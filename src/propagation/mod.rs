//! Carrying trace identity across process boundaries.
//!
//! Propagators read and write **carriers**: flat string-keyed maps attached
//! to whatever transport connects two services (HTTP headers in practice).
//! [`Injector`] and [`Extractor`] abstract the carrier so the codec never
//! depends on a concrete transport; implementations are provided for
//! `HashMap<String, String>` here and for `http::HeaderMap` in
//! [`propagation::http`](crate::propagation::http).
//!
//! Extraction is strictly best-effort: absent or malformed carrier entries
//! degrade to "no remote parent" and never fail the request being handled.

use crate::Context;
use std::collections::HashMap;
use std::fmt;

pub mod http;
mod trace_context;

pub use trace_context::TraceContextPropagator;

/// Injector provides an interface for adding fields to an underlying
/// carrier such as a `HashMap`.
pub trait Injector {
    /// Add a key and value to the underlying data.
    fn set(&mut self, key: &str, value: String);
}

/// Extractor provides an interface for reading fields from an underlying
/// carrier such as a `HashMap`.
pub trait Extractor {
    /// Get a value for a key from the underlying data.
    fn get(&self, key: &str) -> Option<&str>;

    /// Collect all the keys from the underlying data.
    fn keys(&self) -> Vec<&str>;
}

impl<S: std::hash::BuildHasher> Injector for HashMap<String, String, S> {
    /// Set a key and value in the `HashMap`.
    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_lowercase(), value);
    }
}

impl<S: std::hash::BuildHasher> Extractor for HashMap<String, String, S> {
    /// Get a value for a key from the `HashMap`.
    fn get(&self, key: &str) -> Option<&str> {
        self.get(&key.to_lowercase()).map(|v| v.as_str())
    }

    /// Collect all the keys from the `HashMap`.
    fn keys(&self) -> Vec<&str> {
        self.keys().map(|k| k.as_str()).collect()
    }
}

/// Serializes the active span's identity into carriers and reconstructs
/// remote parent references from them.
pub trait TextMapPropagator: fmt::Debug {
    /// Encode the active span of `cx` into the carrier. A context without a
    /// valid span context leaves the carrier untouched.
    fn inject_context(&self, cx: &Context, injector: &mut dyn Injector);

    /// Encode the current context's active span into the carrier.
    fn inject(&self, injector: &mut dyn Injector) {
        Context::map_current(|cx| self.inject_context(cx, injector))
    }

    /// Decode a remote parent reference from the carrier into a copy of
    /// `cx`. Malformed or absent entries yield `cx` unchanged.
    fn extract_with_context(&self, cx: &Context, extractor: &dyn Extractor) -> Context;

    /// Decode a remote parent reference from the carrier into a copy of the
    /// current context.
    fn extract(&self, extractor: &dyn Extractor) -> Context {
        Context::map_current(|cx| self.extract_with_context(cx, extractor))
    }

    /// The carrier keys this propagator reads and writes.
    fn fields(&self) -> &'static [&'static str];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_map_carrier_is_case_insensitive() {
        let mut carrier = HashMap::new();
        carrier.set("headerName", "value".to_string());

        assert_eq!(
            Extractor::get(&carrier, "HEADERNAME"),
            Some("value"),
            "case insensitive extraction"
        );
    }

    #[test]
    fn hash_map_keys() {
        let mut carrier = HashMap::new();
        carrier.set("headerName1", "value1".to_string());
        carrier.set("headerName2", "value2".to_string());

        let got = Extractor::keys(&carrier);
        assert_eq!(got.len(), 2);
        assert!(got.contains(&"headername1"));
        assert!(got.contains(&"headername2"));
    }
}
