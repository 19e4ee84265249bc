//! Single-threaded cooperative scheduler.
//!
//! Tasks are step functions returning `Poll<()>`. The scheduler runs them
//! round-robin on the calling thread; a task that returns `Pending` goes to
//! the back of the queue. Each task owns the context captured when it was
//! spawned, so state set in one step is visible in the next step of the same
//! task and nowhere else.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::task::Poll;

use tracing::{debug, trace, warn};

use crate::context::{copy_current_context, Context};
use crate::error::TaskVarResult;

use super::{context_or_current, Schedule, TaskId};

/// Local scheduler configuration.
#[derive(Debug, Clone)]
pub struct LocalSchedulerConfig {
    /// Maximum steps and callbacks executed by one `run_until_idle` call.
    pub max_steps_per_run: usize,
}

impl Default for LocalSchedulerConfig {
    fn default() -> Self {
        Self {
            max_steps_per_run: 1_000_000,
        }
    }
}

/// Counters for one `run_until_idle` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Task steps executed.
    pub steps: usize,
    /// Tasks that returned `Ready`.
    pub tasks_completed: usize,
    /// Callbacks executed.
    pub callbacks_run: usize,
    /// True if the run stopped with work still queued.
    pub budget_exhausted: bool,
}

struct LocalTask {
    id: TaskId,
    context: Arc<Context>,
    step: Box<dyn FnMut() -> Poll<()>>,
}

enum Runnable {
    Task(LocalTask),
    Callback {
        callback: Box<dyn FnOnce()>,
        context: Arc<Context>,
    },
}

struct Inner {
    config: LocalSchedulerConfig,
    queue: RefCell<VecDeque<Runnable>>,
}

/// Cooperative round-robin scheduler bound to the current thread.
///
/// Cloning yields another handle to the same queue, which lets a running
/// step spawn further tasks.
#[derive(Clone)]
pub struct LocalScheduler {
    inner: Rc<Inner>,
}

impl LocalScheduler {
    /// Creates a scheduler.
    #[must_use]
    pub fn new(config: LocalSchedulerConfig) -> Self {
        let config = LocalSchedulerConfig {
            max_steps_per_run: config.max_steps_per_run.max(1),
        };
        Self {
            inner: Rc::new(Inner {
                config,
                queue: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Spawns a task that inherits a snapshot of the caller's active context.
    ///
    /// Called from inside another task's step, the child sees the parent's
    /// current values; later changes on either side stay private.
    pub fn spawn<F>(&self, step: F) -> TaskId
    where
        F: FnMut() -> Poll<()> + 'static,
    {
        self.spawn_in(Arc::new(copy_current_context()), step)
    }

    /// Spawns a task running in an explicit context.
    pub fn spawn_in<F>(&self, context: Arc<Context>, step: F) -> TaskId
    where
        F: FnMut() -> Poll<()> + 'static,
    {
        let id = TaskId::new();
        trace!(task = %id, context = %context.id(), "spawned task");
        self.inner.queue.borrow_mut().push_back(Runnable::Task(LocalTask {
            id,
            context,
            step: Box::new(step),
        }));
        id
    }

    /// Queues a one-shot callback; `None` snapshots the caller's context now.
    pub fn call_soon_local<F>(&self, callback: F, context: Option<Arc<Context>>)
    where
        F: FnOnce() + 'static,
    {
        self.inner.queue.borrow_mut().push_back(Runnable::Callback {
            callback: Box::new(callback),
            context: context_or_current(context),
        });
    }

    /// Number of queued tasks and callbacks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().len()
    }

    /// Runs queued work until the queue is empty or the step budget is spent.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::AlreadyEntered`](crate::ContextError::AlreadyEntered)
    /// if the context of a task or callback is already entered, e.g. when a
    /// step re-runs the scheduler from inside its own context. That work stays
    /// queued at the front and runs on a later call.
    pub fn run_until_idle(&self) -> TaskVarResult<RunStats> {
        let budget = self.inner.config.max_steps_per_run;
        let mut stats = RunStats::default();

        loop {
            if stats.steps + stats.callbacks_run >= budget {
                stats.budget_exhausted = self.pending() > 0;
                break;
            }

            let next = self.inner.queue.borrow_mut().pop_front();
            let Some(runnable) = next else {
                break;
            };

            match runnable {
                Runnable::Task(mut task) => {
                    let polled = task.context.try_run(|| (task.step)());
                    let poll = match polled {
                        Ok(poll) => poll,
                        Err(err) => {
                            warn!(task = %task.id, error = %err, "task context unavailable");
                            self.inner.queue.borrow_mut().push_front(Runnable::Task(task));
                            return Err(err);
                        }
                    };
                    stats.steps += 1;

                    if poll.is_ready() {
                        stats.tasks_completed += 1;
                        debug!(task = %task.id, "task completed");
                    } else {
                        self.inner.queue.borrow_mut().push_back(Runnable::Task(task));
                    }
                }
                Runnable::Callback { callback, context } => {
                    let mut pending = Some(callback);
                    let ran = context.try_run(|| {
                        if let Some(callback) = pending.take() {
                            callback();
                        }
                    });
                    if let Err(err) = ran {
                        warn!(
                            context = %context.id(),
                            error = %err,
                            "callback context unavailable"
                        );
                        if let Some(callback) = pending {
                            self.inner
                                .queue
                                .borrow_mut()
                                .push_front(Runnable::Callback { callback, context });
                        }
                        return Err(err);
                    }
                    stats.callbacks_run += 1;
                }
            }
        }

        Ok(stats)
    }
}

impl Default for LocalScheduler {
    fn default() -> Self {
        Self::new(LocalSchedulerConfig::default())
    }
}

impl fmt::Debug for LocalScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalScheduler")
            .field("config", &self.inner.config)
            .field("pending", &self.pending())
            .finish()
    }
}

impl Schedule for LocalScheduler {
    fn call_soon<F>(&self, callback: F, context: Option<Arc<Context>>) -> TaskVarResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.call_soon_local(callback, context);
        Ok(())
    }
}
