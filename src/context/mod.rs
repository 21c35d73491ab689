//! Execution-scoped context propagation.
//!
//! A [`Context`] carries the currently active span for one logical request.
//! Many concurrent requests share a single cooperative scheduler, so the
//! active span can never live in a process-wide slot: each context is an
//! immutable value that is attached to the executing thread only while the
//! code (or future poll) it belongs to is actually running, and restored to
//! the previous value as soon as that code yields or returns.
//!
//! Synchronous code attaches a context with [`Context::attach`] and holds the
//! returned [`ContextGuard`]. Asynchronous code wraps its future with
//! [`FutureContextExt::with_context`], which re-attaches the context at every
//! poll so the association survives suspension points even while other
//! requests' continuations run in between.

use crate::trace::context::SynchronizedSpan;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

mod future_ext;

pub use future_ext::{FutureContextExt, SinkContextExt, StreamContextExt, WithContext};

thread_local! {
    static CURRENT_CONTEXT: std::cell::RefCell<ContextStack> =
        std::cell::RefCell::new(ContextStack::default());
}

/// An execution-scoped value holding the currently active span.
///
/// Contexts are immutable; write operations such as
/// [`with_span`](crate::trace::TraceContextExt::with_span) return a new
/// context rather than mutating the original. Cloning is cheap (an `Arc`
/// clone).
///
/// # Examples
///
/// ```
/// use reqtrace::{trace::TraceContextExt, Context};
///
/// // No span is active until a context holding one is attached.
/// assert!(!Context::map_current(|cx| cx.has_active_span()));
/// ```
#[derive(Clone, Default)]
pub struct Context {
    pub(crate) span: Option<Arc<SynchronizedSpan>>,
}

impl Context {
    /// Creates an empty `Context`.
    pub fn new() -> Self {
        Context::default()
    }

    /// Returns an immutable snapshot of the current thread's context.
    pub fn current() -> Self {
        Self::map_current(|cx| cx.clone())
    }

    /// Applies a function to the current context, returning its value.
    ///
    /// This avoids cloning the current context when only a read is needed.
    pub fn map_current<T>(f: impl FnOnce(&Context) -> T) -> T {
        CURRENT_CONTEXT.with(|cx| cx.borrow().map_current_cx(f))
    }

    /// Replaces the current context on this thread with this context.
    ///
    /// Dropping the returned [`ContextGuard`] restores the previous context,
    /// on both normal scope exit and unwinding. Guards may be dropped out of
    /// order; the stack reconciles when the innermost guard goes away.
    ///
    /// # Examples
    ///
    /// ```
    /// use reqtrace::{trace::TraceContextExt, trace::TracerProvider, Context};
    ///
    /// let provider = TracerProvider::builder().build();
    /// let tracer = provider.tracer("signin");
    /// let cx = Context::new().with_span(tracer.start("handle-request"));
    ///
    /// {
    ///     let _guard = cx.attach();
    ///     assert!(Context::map_current(|cx| cx.has_active_span()));
    /// }
    ///
    /// // Dropping the guard detaches the context again.
    /// assert!(!Context::map_current(|cx| cx.has_active_span()));
    /// ```
    pub fn attach(self) -> ContextGuard {
        let pos = CURRENT_CONTEXT.with(|cx| cx.borrow_mut().push(self));

        ContextGuard {
            pos,
            _marker: PhantomData,
        }
    }

    pub(crate) fn with_synchronized_span(&self, span: SynchronizedSpan) -> Self {
        Context {
            span: Some(Arc::new(span)),
        }
    }

    pub(crate) fn current_with_synchronized_span(span: SynchronizedSpan) -> Self {
        Context {
            span: Some(Arc::new(span)),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Context");
        match &self.span {
            Some(span) => dbg.field("span", span.span_context()),
            None => dbg.field("span", &"None"),
        };
        dbg.finish()
    }
}

/// A guard that resets the current context to the prior context when dropped.
#[derive(Debug)]
pub struct ContextGuard {
    // Position of the attached context in the thread's stack.
    pos: u16,
    // Relies on thread locals, so must not be Send.
    _marker: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let pos = self.pos;
        if pos > ContextStack::BASE_POS && pos < ContextStack::MAX_POS {
            CURRENT_CONTEXT.with(|stack| stack.borrow_mut().pop_pos(pos));
        }
    }
}

/// Bookkeeping for the contexts attached to one thread.
///
/// Guards can be dropped out of order, so detached positions are tombstoned
/// and only reclaimed once the top of the stack is popped. The positions
/// handed out are only ever used on the owning thread because
/// [`ContextGuard`] is not `Send`.
struct ContextStack {
    /// The context currently active on this thread. Kept outside `stack` so
    /// reads don't touch the vector.
    current_cx: Context,
    /// Previously attached contexts, `None` where a guard was dropped out of
    /// order.
    stack: Vec<Option<Context>>,
    _marker: PhantomData<*const ()>,
}

impl ContextStack {
    const BASE_POS: u16 = 0;
    const MAX_POS: u16 = u16::MAX;
    const INITIAL_CAPACITY: usize = 8;

    #[inline(always)]
    fn push(&mut self, cx: Context) -> u16 {
        // Position 0 is reserved for the always-present base context.
        let next_pos = self.stack.len() + 1;
        if next_pos < ContextStack::MAX_POS.into() {
            let previous = std::mem::replace(&mut self.current_cx, cx);
            self.stack.push(Some(previous));
            next_pos as u16
        } else {
            tracing::warn!(
                limit = ContextStack::MAX_POS,
                "too many attached contexts; attach ignored and the returned guard will be inert"
            );
            ContextStack::MAX_POS
        }
    }

    #[inline(always)]
    fn pop_pos(&mut self, pos: u16) {
        let len: u16 = self.stack.len() as u16;
        if pos == len {
            // Top of the stack: restore the previous context and reclaim any
            // tombstones left behind by out-of-order drops.
            while let Some(None) = self.stack.last() {
                _ = self.stack.pop();
            }
            if let Some(Some(next_cx)) = self.stack.pop() {
                self.current_cx = next_cx;
            }
        } else if pos < len {
            // Out-of-order drop: tombstone the entry, reclaimed later.
            _ = self.stack[pos as usize].take();
        } else {
            tracing::warn!(
                position = pos,
                stack_length = len,
                "attempted to detach a context beyond the end of the stack"
            );
        }
    }

    #[inline(always)]
    fn map_current_cx<T>(&self, f: impl FnOnce(&Context) -> T) -> T {
        f(&self.current_cx)
    }
}

impl Default for ContextStack {
    fn default() -> Self {
        ContextStack {
            current_cx: Context::default(),
            stack: Vec::with_capacity(ContextStack::INITIAL_CAPACITY),
            _marker: PhantomData,
        }
    }
}
