//! Shared configuration for all [`Tracer`]s created by one provider.
//!
//! [`Tracer`]: crate::trace::Tracer

use crate::trace::id_generator::{IdGenerator, RandomIdGenerator};
use std::borrow::Cow;

/// Default `service.name` value when none is configured.
pub(crate) const DEFAULT_SERVICE_NAME: &str = "unknown_service";

/// Tracer configuration owned by a [`TracerProvider`].
///
/// [`TracerProvider`]: crate::trace::TracerProvider
#[derive(Debug)]
pub(crate) struct Config {
    /// The id generator used for new trace and span ids.
    pub(crate) id_generator: Box<dyn IdGenerator>,

    /// Caps applied to data recorded on each span.
    pub(crate) span_limits: SpanLimits,

    /// Logical name of the service emitting spans, stamped on every exported
    /// span record.
    pub(crate) service_name: Cow<'static, str>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            id_generator: Box::<RandomIdGenerator>::default(),
            span_limits: SpanLimits::default(),
            service_name: Cow::Borrowed(DEFAULT_SERVICE_NAME),
        }
    }
}

/// Caps applied to the data recorded on a single span.
#[derive(Copy, Clone, Debug)]
pub struct SpanLimits {
    /// The max number of unique attribute keys per span.
    pub max_attributes_per_span: u32,
}

/// Default number of unique attribute keys kept per span.
pub(crate) const DEFAULT_MAX_ATTRIBUTES_PER_SPAN: u32 = 128;

impl Default for SpanLimits {
    fn default() -> Self {
        SpanLimits {
            max_attributes_per_span: DEFAULT_MAX_ATTRIBUTES_PER_SPAN,
        }
    }
}
