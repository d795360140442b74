use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::error::{ExecutorError, ExecutorResult};

/// A unit of work: runs exactly once, on some worker.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A bounded pool of worker threads for running connection jobs.
///
/// The pool has the following features:
/// - Worker threads are spawned on demand, never more than `max_workers`
/// - Worker threads that automatically exit after a period of inactivity
/// - Jobs queue up while every worker is busy, so submitting never blocks
/// - A panicking job is logged and does not take its worker down
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

/// Internal state shared between the executor and its worker threads
struct Inner {
    /// Duration a worker thread will wait for new jobs before shutting down
    keep_alive: Duration,
    /// Shared state protected by a mutex
    shared: Mutex<Shared>,
    /// Maximum number of worker threads allowed
    max_workers: usize,
    /// Condition variable for worker thread synchronization
    condvar: Condvar,
}

/// Shared state for the thread pool
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

impl Executor {
    /// Creates a new executor with the specified configuration.
    ///
    /// # Arguments
    /// * `max_workers` - Optional maximum number of worker threads. Defaults to one per CPU core
    /// * `keep_alive` - Optional duration workers will wait for new jobs. Defaults to 6 seconds
    pub fn new(max_workers: Option<usize>, keep_alive: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    queue: VecDeque::new(),
                    workers: 0,
                    idle: 0,
                    notified: 0,
                }),
                condvar: Condvar::new(),
                keep_alive: keep_alive.unwrap_or_else(|| Duration::from_secs(6)),
                max_workers: max_workers.unwrap_or_else(num_cpus::get).max(1),
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    /// Number of worker threads currently alive.
    pub fn workers(&self) -> usize {
        self.inner
            .shared
            .lock()
            .map(|shared| shared.workers)
            .unwrap_or(0)
    }

    /// Queues a job.
    ///
    /// This will either wake up an idle worker or spawn a new one if the pool
    /// has room; otherwise the job waits for the next free worker.
    ///
    /// # Errors
    /// Returns an error if the pool lock is poisoned or a worker thread
    /// cannot be spawned.
    pub fn execute<F>(&self, job: F) -> ExecutorResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut shared = self
            .inner
            .shared
            .lock()
            .map_err(|_| ExecutorError::LockPoisoned)?;

        shared.queue.push_back(Box::new(job));

        if shared.idle == 0 && shared.workers < self.inner.max_workers {
            shared.workers += 1;
            if let Err(e) = self.spawn_worker(self.inner.clone()) {
                shared.workers -= 1;
                if shared.workers > 0 {
                    // a busy worker drains the queue eventually
                    log::warn!("{}; job left queued", e);
                    return Ok(());
                }
                shared.queue.pop_back();
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
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    fn spawn_worker(&self, inner: Arc<Inner>) -> ExecutorResult<()> {
        std::thread::Builder::new()
            .name("nicehttp-worker".to_owned())
            .spawn(move || {
                if let Err(e) = inner.run() {
                    log::error!("Worker thread error: {}", e);
                }
            })
            .map_err(ExecutorError::ThreadSpawn)?;
        Ok(())
    }
}

impl Inner {
    /// Main worker thread loop.
    ///
    /// The worker will:
    /// 1. Process all available jobs in the queue
    /// 2. Wait for new jobs using a condition variable
    /// 3. Exit if no jobs arrive within the keep-alive duration
    ///
    /// # Errors
    /// Returns an error if mutex operations fail
    fn run(&self) -> ExecutorResult<()> {
        let mut shared = self
            .shared
            .lock()
            .map_err(|_| ExecutorError::LockPoisoned)?;

        'alive: loop {
            while let Some(job) = shared.queue.pop_front() {
                drop(shared);
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    log::error!("job panicked; worker keeps running");
                }
                shared = self
                    .shared
                    .lock()
                    .map_err(|_| ExecutorError::LockPoisoned)?;
            }

            shared.idle += 1;

            loop {
                let result = self
                    .condvar
                    .wait_timeout(shared, self.keep_alive)
                    .map_err(|_| ExecutorError::LockPoisoned)?;

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
    use std::time::Duration;

    /// Tests that an executor is created with the correct configuration parameters.
    #[test]
    fn test_executor_creation() {
        let executor = Executor::new(Some(4), Some(Duration::from_secs(10)));
        assert_eq!(executor.max_workers(), 4);
        assert_eq!(executor.inner.keep_alive, Duration::from_secs(10));
        assert_eq!(executor.workers(), 0);
    }

    /// Tests that the pool sizes itself by CPU count when no size is given.
    #[test]
    fn test_default_pool_size() {
        let executor = Executor::new(None, None);
        assert_eq!(executor.max_workers(), num_cpus::get().max(1));
    }

    /// Tests that jobs submitted to the executor are properly executed.
    #[test]
    fn test_job_execution() {
        let executor = Executor::new(None, None);
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let (tx, rx) = mpsc::channel();

        executor
            .execute(move || {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                tx.send(()).unwrap();
            })
            .unwrap();

        rx.recv_timeout(Duration::from_secs(1))
            .expect("Job execution timed out");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    /// Tests that more jobs than workers all run, and the pool never grows
    /// past its bound.
    #[test]
    fn test_jobs_queue_beyond_pool_size() {
        let executor = Executor::new(Some(2), None);
        let (tx, rx) = mpsc::channel();

        for i in 0..16 {
            let tx = tx.clone();
            executor
                .execute(move || {
                    std::thread::sleep(Duration::from_millis(5));
                    tx.send(i).unwrap();
                })
                .unwrap();
            assert!(executor.workers() <= 2);
        }

        let mut seen: Vec<i32> = (0..16)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    /// Tests that a panicking job does not kill its worker.
    #[test]
    fn test_panicking_job_keeps_worker() {
        let executor = Executor::new(Some(1), None);
        let (tx, rx) = mpsc::channel();

        executor.execute(|| panic!("boom")).unwrap();
        executor.execute(move || tx.send("after").unwrap()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "after");
        assert_eq!(executor.workers(), 1);
    }

    /// Tests that idle workers exit after the keep-alive period.
    #[test]
    fn test_idle_workers_exit() {
        let executor = Executor::new(Some(1), Some(Duration::from_millis(50)));
        let (tx, rx) = mpsc::channel();
        executor.execute(move || tx.send(()).unwrap()).unwrap();
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(executor.workers(), 0);
    }
}
