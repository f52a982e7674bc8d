use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{RunnerError, RunnerResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A pool of dispatch threads that takes blocking response work off the
/// readiness loop.
///
/// - Grows on demand up to `max_workers` threads
/// - Idle threads exit after `keep_alive` without work
/// - Jobs queue up while every thread is busy
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

/// Internal state shared between the pool handle and its threads
struct Inner {
    /// Duration a worker thread will wait for new jobs before exiting
    keep_alive: Duration,
    /// Shared state protected by a mutex
    shared: Mutex<Shared>,
    /// Maximum number of worker threads allowed
    max_workers: usize,
    /// Condition variable for worker thread synchronization
    condvar: Condvar,
}

struct Shared {
    /// Queue of pending jobs
    queue: VecDeque<Job>,
    /// Current number of worker threads
    workers: usize,
    /// Number of idle worker threads
    idle: usize,
    /// Number of workers that have been notified of new work
    notified: usize,
}

impl WorkerPool {
    /// Creates a new pool.
    ///
    /// # Arguments
    /// * `max_workers` - Maximum number of threads, at least one
    /// * `keep_alive` - How long an idle thread waits before exiting
    pub fn new(max_workers: usize, keep_alive: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    queue: VecDeque::new(),
                    workers: 0,
                    idle: 0,
                    notified: 0,
                }),
                condvar: Condvar::new(),
                keep_alive,
                max_workers: max_workers.max(1),
            }),
        }
    }

    /// Queues a job, waking an idle thread or starting a new one.
    ///
    /// Errors are logged; the job stays queued for the running threads.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(e) = self.try_execute(Box::new(job)) {
            log::error!("Failed to queue dispatch job: {}", e);
        }
    }

    fn try_execute(&self, job: Job) -> RunnerResult<()> {
        let mut shared = self
            .inner
            .shared
            .lock()
            .map_err(|_| RunnerError::LockPoisoned)?;

        shared.queue.push_back(job);

        if shared.idle == 0 && shared.workers != self.inner.max_workers {
            shared.workers += 1;
            if let Err(e) = self.spawn_worker(self.inner.clone()) {
                shared.workers -= 1;
                return Err(e);
            }
        } else if shared.idle > 0 {
            shared.idle -= 1;
            shared.notified += 1;
            self.inner.condvar.notify_one();
        }
        Ok(())
    }

    /// Spawns a new worker thread that will process jobs from the queue.
    fn spawn_worker(&self, inner: Arc<Inner>) -> RunnerResult<()> {
        std::thread::Builder::new()
            .name("pollhttpd-worker".to_owned())
            .spawn(move || {
                if let Err(e) = inner.run() {
                    log::error!("Worker thread error: {}", e);
                }
            })
            .map_err(RunnerError::ThreadSpawn)?;
        Ok(())
    }
}

impl Inner {
    /// Main worker thread loop.
    ///
    /// The worker will:
    /// 1. Process all available jobs in the queue
    /// 2. Wait for new jobs using the condition variable
    /// 3. Exit if no job arrives within the keep-alive duration
    ///
    /// A panicking job is logged and the worker carries on, so the worker
    /// count stays accurate.
    fn run(&self) -> RunnerResult<()> {
        let mut shared = self.shared.lock().map_err(|_| RunnerError::LockPoisoned)?;

        'alive: loop {
            while let Some(job) = shared.queue.pop_front() {
                drop(shared);
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    log::error!("Dispatch job panicked");
                }
                shared = self.shared.lock().map_err(|_| RunnerError::LockPoisoned)?;
            }

            shared.idle += 1;

            loop {
                let result = self
                    .condvar
                    .wait_timeout(shared, self.keep_alive)
                    .map_err(|_| RunnerError::LockPoisoned)?;

                shared = result.0;
                let timeout = result.1;

                if shared.notified != 0 {
                    shared.notified -= 1;
                    continue 'alive;
                }

                if timeout.timed_out() {
                    break 'alive;
                }
            }
        }

        shared.workers -= 1;
        shared.idle -= 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    /// Tests that a pool is created with the correct configuration parameters.
    #[test]
    fn test_pool_creation() {
        let pool = WorkerPool::new(4, Duration::from_secs(10));
        assert_eq!(pool.inner.max_workers, 4);
        assert_eq!(pool.inner.keep_alive, Duration::from_secs(10));

        let pool = WorkerPool::new(0, Duration::from_secs(1));
        assert_eq!(pool.inner.max_workers, 1);
    }

    /// Tests that queued jobs all run, even with fewer threads than jobs.
    #[test]
    fn test_job_execution() {
        let pool = WorkerPool::new(2, Duration::from_secs(1));
        let counter = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel();

        for _ in 0..8 {
            let counter = counter.clone();
            let tx = tx.clone();
            pool.execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            });
        }

        for _ in 0..8 {
            rx.recv_timeout(Duration::from_secs(5)).expect("job timed out");
        }
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        assert!(pool.inner.shared.lock().unwrap().workers <= 2);
    }

    /// A panicking job neither kills its worker nor leaks the worker count.
    #[test]
    fn test_panicking_job_keeps_worker() {
        let pool = WorkerPool::new(1, Duration::from_secs(1));
        let (tx, rx) = mpsc::channel();

        pool.execute(|| panic!("response handler failed"));
        pool.execute(move || tx.send(()).unwrap());

        rx.recv_timeout(Duration::from_secs(5)).expect("job after panic never ran");
        assert_eq!(pool.inner.shared.lock().unwrap().workers, 1);
    }

    /// Idle workers exit after the keep-alive and new work restarts them.
    #[test]
    fn test_idle_workers_exit() {
        let pool = WorkerPool::new(1, Duration::from_millis(50));
        let (tx, rx) = mpsc::channel();

        let first = tx.clone();
        pool.execute(move || first.send(1).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(pool.inner.shared.lock().unwrap().workers, 0);

        pool.execute(move || tx.send(2).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 2);
    }
}
