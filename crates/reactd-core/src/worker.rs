//! Worker pool abstraction.
//!
//! A `WorkerPool` executes request processing off the reactor thread so
//! that slow work (parsing, routing, storage access, response writes)
//! never stalls the readiness loop. Workers can block independently.
//!
//! The default implementor is `FixedPool` in `reactd-module`: N OS
//! threads spawned at creation, all pulling from one FIFO queue.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use crossbeam_channel::{Receiver, Sender};

use crate::error::{PoolError, TaskError};

type Job = Box<dyn FnOnce() -> Result<(), TaskError> + Send + 'static>;

/// How a task ended. Only delivered when the submitter asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed(String),
    Panicked(String),
}

/// A unit of work: an opaque invocable plus an optional result channel.
pub struct Task {
    job: Job,
    reply: Option<Sender<TaskOutcome>>,
}

impl Task {
    /// Create a fire-and-forget task.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        Self { job: Box::new(f), reply: None }
    }

    /// Create a task whose outcome is reported on the returned receiver.
    pub fn with_outcome<F>(f: F) -> (Self, Receiver<TaskOutcome>)
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (Self { job: Box::new(f), reply: Some(tx) }, rx)
    }

    /// Run the task on the current thread.
    ///
    /// Errors and panics are contained here and reported through the result
    /// channel, if any. The calling worker always survives.
    pub fn run(self) {
        let Task { job, reply } = self;
        let outcome = match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(())) => TaskOutcome::Completed,
            Ok(Err(e)) => TaskOutcome::Failed(e.to_string()),
            Err(payload) => TaskOutcome::Panicked(panic_message(&*payload)),
        };
        if let Some(tx) = reply {
            // Receiver may have been dropped; nobody is listening then.
            let _ = tx.send(outcome);
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("has_reply", &self.reply.is_some())
            .finish_non_exhaustive()
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

/// Executes submitted tasks on a pool of threads.
///
/// **Contract:**
/// - `submit()` never blocks. After `shutdown()` it fails with
///   `PoolError::Closed`.
/// - Every accepted task runs exactly once; tasks are dequeued in FIFO
///   order.
/// - `shutdown()` drains tasks already queued, then joins the workers.
///   A task that is already running is not cancelled.
pub trait WorkerPool: Send + Sync {
    /// Enqueue a task for execution on a worker thread.
    fn submit(&self, task: Task) -> Result<(), PoolError>;

    /// Number of tasks waiting in the queue.
    fn pending(&self) -> usize;

    /// Number of workers currently executing a task.
    fn active_workers(&self) -> usize;

    /// Total number of workers.
    fn total_workers(&self) -> usize;

    /// Gracefully shut down all workers. Blocks until drained. Idempotent.
    fn shutdown(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_completed() {
        let (task, rx) = Task::with_outcome(|| Ok(()));
        task.run();
        assert_eq!(rx.recv().unwrap(), TaskOutcome::Completed);
    }

    #[test]
    fn test_outcome_failed() {
        let (task, rx) = Task::with_outcome(|| Err(TaskError::Other("boom".into())));
        task.run();
        assert_eq!(rx.recv().unwrap(), TaskOutcome::Failed("boom".into()));
    }

    #[test]
    fn test_outcome_panicked() {
        let (task, rx) = Task::with_outcome(|| panic!("kaboom"));
        task.run();
        assert_eq!(rx.recv().unwrap(), TaskOutcome::Panicked("kaboom".into()));
    }

    #[test]
    fn test_dropped_receiver_is_fine() {
        let (task, rx) = Task::with_outcome(|| Ok(()));
        drop(rx);
        task.run();
    }
}
