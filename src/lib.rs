//! # taskvars - Task-Local Context Variables
//!
//! taskvars generalizes thread-local storage to cooperative schedulers, where
//! many logical tasks share one thread. Each task carries its own context;
//! values set inside a task are visible across that task's resumptions, are
//! invisible to sibling tasks interleaved on the same thread, and are
//! inherited by child tasks at creation time.
//!
//! ## Core Concepts
//!
//! - **PersistentMap**: immutable hash-array-mapped trie with structural sharing
//! - **ContextVar**: typed handle to one slot of the active context
//! - **ResetToken**: receipt that undoes exactly one `set`
//! - **Context**: snapshot of a store version plus `run`, which installs it
//! - **Scheduler integration**: tasks capture a context at spawn and run
//!   every step inside it
//!
//! ## Usage
//!
//! ```rust
//! use taskvars::{copy_current_context, ContextVar};
//!
//! let locale = ContextVar::with_default("locale", "en-US".to_string());
//!
//! let token = locale.set("fr-FR".to_string());
//! let task_ctx = copy_current_context();
//! locale.reset(&token).unwrap();
//!
//! assert_eq!(locale.get().unwrap(), "en-US");
//! assert_eq!(task_ctx.run(|| locale.get().unwrap()), "fr-FR");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod error;
pub mod scheduler;
pub mod slot;
pub mod store;
pub mod token;
pub mod value;
pub mod var;

// Re-export primary types at crate root for convenience
pub use context::{
    copy_current_context, Context, ContextId, ContextMap, ContextSnapshot, SnapshotEntry,
};
pub use error::{ContextError, SchedulerError, TaskVarError, TaskVarResult, VariableError};
pub use scheduler::{
    ContextFutureExt, JobHandle, LocalScheduler, LocalSchedulerConfig, RunStats, Schedule, TaskId,
    WithContext, WorkerPool, WorkerPoolConfig,
};
pub use slot::current_context_id;
pub use store::{PersistentMap, StoreError};
pub use token::{Prior, ResetToken};
pub use value::Value;
pub use var::{ContextVar, Resolved, ValueSource, VarId};
