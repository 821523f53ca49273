//! `FixedPool` — default `WorkerPool` implementation.
//!
//! Spawns N OS threads at creation. Workers dequeue from one lock-free
//! MPMC FIFO queue and run the task. Idle workers sleep on a condvar;
//! `submit` wakes one of them.
//!
//! The worker count is fixed for the life of the pool.

use reactd_core::error::PoolError;
use reactd_core::worker::{Task, WorkerPool};

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, trace};

/// Shared state between the submitter and workers.
struct PoolInner {
    /// Work queue: reactor → workers.
    queue: SegQueue<Task>,
    /// Guards the shutdown flag transition and the idle wait.
    ///
    /// `submit` pushes while holding it, so a worker that saw an empty
    /// queue under the lock cannot miss the notify that follows.
    idle_lock: Mutex<()>,
    idle: Condvar,
    /// Number of workers currently executing a task.
    active: AtomicUsize,
    /// Shutdown flag. Only written under `idle_lock`.
    shutdown: AtomicBool,
    /// Total worker count.
    total: usize,
}

pub struct FixedPool {
    inner: Arc<PoolInner>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    /// Set once every worker has been joined.
    joined: Mutex<bool>,
    joined_cv: Condvar,
}

impl FixedPool {
    /// Create a pool with `n` workers (at least one).
    pub fn new(n: usize) -> Result<Self, PoolError> {
        let n = n.max(1);
        let inner = Arc::new(PoolInner {
            queue: SegQueue::new(),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
            active: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            total: n,
        });

        let mut handles = Vec::with_capacity(n);
        for worker_id in 0..n {
            let shared = Arc::clone(&inner);
            let spawned = thread::Builder::new()
                .name(format!("reactd-worker-{}", worker_id))
                .spawn(move || worker_loop(shared, worker_id));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    Self::from_parts(inner, handles).shutdown();
                    return Err(PoolError::Spawn(e.to_string()));
                }
            }
        }

        debug!(workers = n, "worker pool started");
        Ok(Self::from_parts(inner, handles))
    }

    fn from_parts(inner: Arc<PoolInner>, handles: Vec<thread::JoinHandle<()>>) -> Self {
        let worker_ids: Vec<ThreadId> = handles.iter().map(|h| h.thread().id()).collect();
        FixedPool {
            inner,
            joined: Mutex::new(handles.is_empty()),
            handles: Mutex::new(handles),
            worker_ids,
            joined_cv: Condvar::new(),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

impl WorkerPool for FixedPool {
    fn submit(&self, task: Task) -> Result<(), PoolError> {
        {
            let _guard = self.inner.idle_lock.lock();
            if self.inner.shutdown.load(Ordering::Acquire) {
                return Err(PoolError::Closed);
            }
            self.inner.queue.push(task);
        }
        self.inner.idle.notify_one();
        Ok(())
    }

    fn pending(&self) -> usize {
        self.inner.queue.len()
    }

    fn active_workers(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    fn total_workers(&self) -> usize {
        self.inner.total
    }

    fn shutdown(&self) {
        {
            let _guard = self.inner.idle_lock.lock();
            self.inner.shutdown.store(true, Ordering::Release);
        }
        self.inner.idle.notify_all();

        let me = thread::current().id();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        if handles.is_empty() {
            // Another caller owns the joins. A worker must not wait for
            // itself to be joined.
            if !self.worker_ids.contains(&me) {
                let mut joined = self.joined.lock();
                while !*joined {
                    self.joined_cv.wait(&mut joined);
                }
            }
            return;
        }
        for handle in handles {
            // A task calling shutdown() must not join its own thread.
            if handle.thread().id() == me {
                continue;
            }
            if handle.join().is_err() {
                debug!("worker thread panicked outside a task");
            }
        }
        *self.joined.lock() = true;
        self.joined_cv.notify_all();
        debug!("worker pool stopped");
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Worker thread main loop.
///
/// Exits only when shutdown is set AND the queue is empty, so every task
/// accepted before shutdown still runs.
fn worker_loop(inner: Arc<PoolInner>, worker_id: usize) {
    loop {
        if let Some(task) = inner.queue.pop() {
            inner.active.fetch_add(1, Ordering::Relaxed);
            task.run();
            inner.active.fetch_sub(1, Ordering::Relaxed);
            continue;
        }

        let mut guard = inner.idle_lock.lock();
        while inner.queue.is_empty() {
            if inner.shutdown.load(Ordering::Acquire) {
                trace!(worker_id, "worker exiting");
                return;
            }
            inner.idle.wait(&mut guard);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactd_core::error::TaskError;
    use reactd_core::worker::TaskOutcome;
    use std::time::Duration;

    #[test]
    fn test_runs_all_tasks_once() {
        let pool = FixedPool::new(4).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..1000 {
            let c = Arc::clone(&counter);
            pool.submit(Task::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 1000);
    }

    #[test]
    fn test_fifo_single_worker() {
        let pool = FixedPool::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..200 {
            let o = Arc::clone(&order);
            pool.submit(Task::new(move || {
                o.lock().push(i);
                Ok(())
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(*order.lock(), (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_backlog_runs_exactly_once_with_many_workers() {
        let pool = FixedPool::new(4).unwrap();
        let started = Arc::new(Mutex::new(Vec::new()));
        let gate = Arc::new((Mutex::new(false), Condvar::new()));

        // Hold every worker so the queue backs up.
        for _ in 0..4 {
            let g = Arc::clone(&gate);
            pool.submit(Task::new(move || {
                let (lock, cv) = &*g;
                let mut open = lock.lock();
                while !*open {
                    cv.wait(&mut open);
                }
                Ok(())
            }))
            .unwrap();
        }
        for i in 0..100 {
            let s = Arc::clone(&started);
            pool.submit(Task::new(move || {
                s.lock().push(i);
                Ok(())
            }))
            .unwrap();
        }
        {
            let (lock, cv) = &*gate;
            *lock.lock() = true;
            cv.notify_all();
        }
        pool.shutdown();

        let started = started.lock();
        assert_eq!(started.len(), 100);
        let mut sorted = started.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = FixedPool::new(2).unwrap();
        pool.shutdown();
        assert_eq!(pool.submit(Task::new(|| Ok(()))), Err(PoolError::Closed));
        assert!(pool.is_shutdown());
    }

    #[test]
    fn test_shutdown_idempotent() {
        let pool = FixedPool::new(2).unwrap();
        pool.shutdown();
        pool.shutdown();
    }

    #[test]
    fn test_queued_tasks_drained_on_shutdown() {
        let pool = FixedPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        // First task is slow so the rest pile up in the queue.
        pool.submit(Task::new(|| {
            thread::sleep(Duration::from_millis(50));
            Ok(())
        }))
        .unwrap();
        for _ in 0..50 {
            let c = Arc::clone(&counter);
            pool.submit(Task::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 50);
        assert_eq!(pool.pending(), 0);
    }

    #[test]
    fn test_failing_task_does_not_kill_worker() {
        let pool = FixedPool::new(1).unwrap();
        let (bad, bad_rx) = Task::with_outcome(|| Err(TaskError::Other("nope".into())));
        let (boom, boom_rx) = Task::with_outcome(|| panic!("worker task panic"));
        let (good, good_rx) = Task::with_outcome(|| Ok(()));
        pool.submit(bad).unwrap();
        pool.submit(boom).unwrap();
        pool.submit(good).unwrap();

        let t = Duration::from_secs(5);
        assert_eq!(bad_rx.recv_timeout(t).unwrap(), TaskOutcome::Failed("nope".into()));
        assert!(matches!(boom_rx.recv_timeout(t).unwrap(), TaskOutcome::Panicked(_)));
        assert_eq!(good_rx.recv_timeout(t).unwrap(), TaskOutcome::Completed);
        pool.shutdown();
    }

    #[test]
    fn test_concurrent_shutdown_waits_for_workers() {
        let pool = Arc::new(FixedPool::new(2).unwrap());
        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let f = Arc::clone(&finished);
            pool.submit(Task::new(move || {
                thread::sleep(Duration::from_millis(100));
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        }

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let finished = Arc::clone(&finished);
                thread::spawn(move || {
                    pool.shutdown();
                    finished.load(Ordering::SeqCst)
                })
            })
            .collect();
        for c in callers {
            assert_eq!(c.join().unwrap(), 2);
        }
    }

    #[test]
    fn test_shutdown_from_inside_a_task() {
        let pool = Arc::new(FixedPool::new(2).unwrap());
        let (task, rx) = {
            let pool = Arc::clone(&pool);
            Task::with_outcome(move || {
                pool.shutdown();
                Ok(())
            })
        };
        pool.submit(task).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), TaskOutcome::Completed);
        pool.shutdown();
        assert!(pool.is_shutdown());
    }

    #[test]
    fn test_counts() {
        let pool = FixedPool::new(3).unwrap();
        assert_eq!(pool.total_workers(), 3);
        assert_eq!(pool.active_workers(), 0);
        pool.shutdown();
    }
}
