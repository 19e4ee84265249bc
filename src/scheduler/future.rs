//! Future adapter that polls inside a context.
//!
//! Any async executor becomes context-aware by wrapping spawned futures:
//! the context is captured when the wrapper is built (task creation time)
//! and every `poll` (each resumption) runs inside it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{self, Poll};

use pin_project::pin_project;

use crate::context::{copy_current_context, Context};

/// Future polled inside a fixed [`Context`].
///
/// # Panics
///
/// Polling panics if the context is already entered, for example when the
/// future is polled from inside [`Context::run`] on the same context or from
/// another `WithContext` sharing it. See [`Context::run`].
#[pin_project]
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct WithContext<F> {
    context: Arc<Context>,
    #[pin]
    future: F,
}

impl<F> WithContext<F> {
    /// Wraps `future` to be polled inside `context`.
    pub fn new(future: F, context: Arc<Context>) -> Self {
        Self { context, future }
    }

    /// The context the future runs in.
    #[must_use]
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }
}

impl<F: Future> Future for WithContext<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut task::Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let future = this.future;
        this.context.run(|| future.poll(cx))
    }
}

/// Extension methods binding futures to contexts.
pub trait ContextFutureExt: Future + Sized {
    /// Polls this future inside `context`.
    ///
    /// # Panics
    ///
    /// The returned future panics when polled while `context` is already
    /// entered, as [`Context::run`] does.
    fn in_context(self, context: Arc<Context>) -> WithContext<Self> {
        WithContext::new(self, context)
    }

    /// Polls this future inside a snapshot of the caller's active context.
    fn in_current_context(self) -> WithContext<Self> {
        WithContext::new(self, Arc::new(copy_current_context()))
    }
}

impl<F: Future> ContextFutureExt for F {}
