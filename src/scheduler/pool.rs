//! Bounded worker pool with context propagation.
//!
//! Jobs are queued on a bounded channel and executed by a fixed set of
//! worker threads. Every job runs inside a context: the one passed at
//! submission, or a snapshot of the submitter's active context. Worker
//! threads have their own slots, so a job never sees another job's state.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle as ThreadHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{SchedulerError, TaskVarError, TaskVarResult};

use super::{context_or_current, Schedule};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Maximum queued jobs.
    pub queue_capacity: usize,
    /// Pool name, used for thread names and error reports.
    pub name: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1024,
            name: "taskvars".to_string(),
        }
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handle returned by [`WorkerPool::submit`].
#[derive(Debug)]
pub struct JobHandle<R> {
    pool: String,
    rx: Receiver<TaskVarResult<R>>,
}

impl<R> JobHandle<R> {
    /// Waits for the job to complete.
    ///
    /// # Errors
    ///
    /// Returns the job's context error, [`SchedulerError::JobPanicked`] if it
    /// panicked, or [`SchedulerError::Disconnected`] if the pool went away
    /// before running it.
    pub fn join(self) -> TaskVarResult<R> {
        self.rx.recv().map_err(|_| {
            TaskVarError::Scheduler(SchedulerError::Disconnected { pool: self.pool.clone() })
        })?
    }

    /// Waits for the job to complete with a timeout.
    ///
    /// # Errors
    ///
    /// As [`JobHandle::join`], plus [`SchedulerError::Timeout`].
    pub fn join_timeout(self, timeout: Duration) -> TaskVarResult<R> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => TaskVarError::Scheduler(SchedulerError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            RecvTimeoutError::Disconnected => {
                TaskVarError::Scheduler(SchedulerError::Disconnected { pool: self.pool.clone() })
            }
        })?
    }
}

/// Fixed-size pool of worker threads running jobs in their contexts.
pub struct WorkerPool {
    name: String,
    tx: Option<Sender<Job>>,
    workers: Vec<ThreadHandle<()>>,
    queue_capacity: usize,
}

impl WorkerPool {
    /// Starts the worker threads.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a worker thread cannot be spawned.
    pub fn start(config: WorkerPoolConfig) -> TaskVarResult<Self> {
        let workers = config.workers.max(1);
        let queue_capacity = config.queue_capacity.max(1);
        let (tx, rx) = bounded::<Job>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Job> = rx.clone();
            let thread_name = format!("{}-{idx}", config.name);
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    debug!(worker = %thread_name, "worker started");
                    while let Ok(job) = rx.recv() {
                        job();
                    }
                    debug!(worker = %thread_name, "worker stopped");
                })
                .map_err(|e| TaskVarError::internal(format!("failed to spawn worker: {e}")))?;
            handles.push(handle);
        }

        Ok(Self {
            name: config.name,
            tx: Some(tx),
            workers: handles,
            queue_capacity,
        })
    }

    /// Pool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of worker threads.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    fn disconnected(&self) -> TaskVarError {
        TaskVarError::Scheduler(SchedulerError::Disconnected {
            pool: self.name.clone(),
        })
    }

    fn try_submit(&self, job: Job) -> TaskVarResult<()> {
        let Some(tx) = &self.tx else {
            return Err(self.disconnected());
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(TaskVarError::Scheduler(SchedulerError::QueueFull {
                pool: self.name.clone(),
                capacity: self.queue_capacity,
            })),
            Err(TrySendError::Disconnected(_)) => Err(self.disconnected()),
        }
    }

    /// Queues `f` to run on a worker inside `context`.
    ///
    /// `None` snapshots the caller's active context now, so the job observes
    /// the values current at submission even if the caller changes them later.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::QueueFull`] when the queue is at capacity and
    /// [`SchedulerError::Disconnected`] after shutdown.
    pub fn submit<F, R>(&self, f: F, context: Option<Arc<Context>>) -> TaskVarResult<JobHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let context = context_or_current(context);
        let (reply_tx, reply_rx) = bounded::<TaskVarResult<R>>(1);
        let pool = self.name.clone();

        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| context.try_run(f)));
            let result = outcome.unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                warn!(pool = %pool, message = %message, "job panicked");
                Err(TaskVarError::Scheduler(SchedulerError::JobPanicked { pool, message }))
            });
            let _ = reply_tx.send(result);
        });

        self.try_submit(job)?;
        Ok(JobHandle {
            pool: self.name.clone(),
            rx: reply_rx,
        })
    }

    /// Submits `f` and waits for its result.
    ///
    /// # Errors
    ///
    /// As [`WorkerPool::submit`] and [`JobHandle::join`].
    pub fn execute<F, R>(&self, f: F, context: Option<Arc<Context>>) -> TaskVarResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit(f, context)?.join()
    }

    /// Stops accepting jobs, drains the queue and joins the workers.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        // Closing the channel lets workers drain queued jobs then exit.
        drop(self.tx.take());
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("workers", &self.workers.len())
            .field("queue_capacity", &self.queue_capacity)
            .finish_non_exhaustive()
    }
}

impl Schedule for WorkerPool {
    fn call_soon<F>(&self, callback: F, context: Option<Arc<Context>>) -> TaskVarResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(callback, context).map(drop)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
