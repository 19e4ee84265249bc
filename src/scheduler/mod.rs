//! Scheduler integration.
//!
//! A cooperative scheduler keeps one [`Context`] per task: it snapshots the
//! creator's context when the task is created and runs every resumption step
//! through [`Context::run`]. Deferred callbacks take an optional explicit
//! context and otherwise snapshot the registering caller's context.
//!
//! - [`LocalScheduler`]: single-threaded round-robin executor of step functions.
//! - [`WorkerPool`]: bounded thread pool running jobs under their context.
//! - [`WithContext`]: future adapter for external async executors.

pub mod future;
pub mod local;
pub mod pool;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{copy_current_context, Context};
use crate::error::TaskVarResult;

pub use future::{ContextFutureExt, WithContext};
pub use local::{LocalScheduler, LocalSchedulerConfig, RunStats};
pub use pool::{JobHandle, WorkerPool, WorkerPoolConfig};

/// Stable identifier for a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new random task ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Schedulers that accept deferred callbacks.
pub trait Schedule {
    /// Queues `callback` to run later inside `context`.
    ///
    /// `None` snapshots the caller's active context at registration time.
    ///
    /// # Errors
    ///
    /// Implementations report backpressure or shutdown as scheduler errors.
    fn call_soon<F>(&self, callback: F, context: Option<Arc<Context>>) -> TaskVarResult<()>
    where
        F: FnOnce() + Send + 'static;
}

/// The explicit context, or a snapshot of the active one.
pub(crate) fn context_or_current(context: Option<Arc<Context>>) -> Arc<Context> {
    context.unwrap_or_else(|| Arc::new(copy_current_context()))
}
