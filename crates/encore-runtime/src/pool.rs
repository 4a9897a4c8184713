//! Bounded worker pool for blocking store and file work.
//!
//! # Thread Pool Configuration
//!
//! The pool is a dedicated rayon pool so storage work never competes with
//! rayon's global pool. When the OS refuses threads the pool shrinks, and
//! as a last resort runs jobs inline on the submitting thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use encore_config::{log_worker_debug, log_worker_error, WorkerConfig};
use rayon::ThreadPool;

use crate::error::{panic_message, RuntimeError};

// ============================================================================
// Thread Pool Configuration
// ============================================================================

/// Upper bound for the default thread count
pub const MAX_POOL_THREADS: usize = 8;

/// Default thread count: one per core, capped at [`MAX_POOL_THREADS`]
pub fn default_thread_count() -> usize {
    num_cpus::get().clamp(1, MAX_POOL_THREADS)
}

enum Backend {
    Rayon(ThreadPool),
    Inline,
}

fn build_backend(threads: usize) -> (Backend, usize) {
    let mut threads = threads.max(1);
    loop {
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("encore-worker-{}", i))
            .build()
        {
            Ok(pool) => return (Backend::Rayon(pool), threads),
            Err(_) if threads > 1 => threads = (threads / 2).max(1),
            Err(e) => {
                log_worker_error!(
                    "No worker threads available, running jobs inline",
                    error = tracing::field::display(&e)
                );
                return (Backend::Inline, 0);
            }
        }
    }
}

// ============================================================================
// Jobs
// ============================================================================

type Callable<T> = Box<dyn FnOnce() -> T + Send + 'static>;
type Callback<T> = Box<dyn FnOnce(&Result<T, RuntimeError>) + Send + 'static>;

/// A unit of work: the callable plus an optional completion callback.
///
/// The callback runs on the worker thread, after the callable, with the
/// job's outcome (including a caught panic).
pub struct Job<T> {
    callable: Callable<T>,
    callback: Option<Callback<T>>,
}

impl<T> Job<T> {
    pub fn new(callable: impl FnOnce() -> T + Send + 'static) -> Self {
        Self {
            callable: Box::new(callable),
            callback: None,
        }
    }

    pub fn with_callback(
        mut self,
        callback: impl FnOnce(&Result<T, RuntimeError>) + Send + 'static,
    ) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }
}

impl<T> std::fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Receiving end of a submitted job
#[derive(Debug)]
pub struct JobHandle<T> {
    rx: Receiver<Result<T, RuntimeError>>,
}

impl<T> JobHandle<T> {
    /// Block until the job finishes.
    pub fn wait(self) -> Result<T, RuntimeError> {
        self.rx.recv().unwrap_or(Err(RuntimeError::Disconnected))
    }

    /// Block for at most `timeout`. `None` means still running.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, RuntimeError>> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(RuntimeError::Disconnected)),
        }
    }

    /// Non-blocking poll. `None` means still running.
    pub fn try_wait(&self) -> Option<Result<T, RuntimeError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(RuntimeError::Disconnected)),
        }
    }
}

// ============================================================================
// Worker Pool
// ============================================================================

/// Parallel pool for jobs that block on disk or CPU
pub struct WorkerPool {
    backend: Backend,
    threads: usize,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a pool. `None` picks [`default_thread_count`].
    pub fn new(threads: Option<usize>) -> Self {
        let (backend, threads) = build_backend(threads.unwrap_or_else(default_thread_count));
        log_worker_debug!("Worker pool started", threads = threads);
        Self {
            backend,
            threads,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(config.threads)
    }

    /// Worker threads in use; 0 when jobs run inline
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Jobs submitted and not yet finished
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Queue a job. Panics inside it are caught and reported through the
    /// handle as [`RuntimeError::Panicked`].
    pub fn submit<T: Send + 'static>(&self, job: Job<T>) -> JobHandle<T> {
        let (tx, rx) = bounded(1);
        let Job { callable, callback } = job;

        self.execute(move || {
            let result = catch_unwind(AssertUnwindSafe(callable)).map_err(|payload| {
                let message = panic_message(&*payload);
                log_worker_error!("Job panicked", panic = message.as_str());
                RuntimeError::Panicked(message)
            });
            if let Some(callback) = callback {
                if catch_unwind(AssertUnwindSafe(|| callback(&result))).is_err() {
                    log_worker_error!("Job callback panicked");
                }
            }
            // The caller may have dropped the handle.
            let _ = tx.send(result);
        });
        JobHandle { rx }
    }

    /// Shorthand for `submit(Job::new(f))`.
    pub fn spawn<T, F>(&self, f: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit(Job::new(f))
    }

    /// Run a fire-and-forget closure on the pool, tracking it as in flight.
    pub(crate) fn execute(&self, f: impl FnOnce() + Send + 'static) {
        let in_flight = Arc::clone(&self.in_flight);
        in_flight.fetch_add(1, Ordering::SeqCst);
        let task = move || {
            f();
            in_flight.fetch_sub(1, Ordering::SeqCst);
        };
        match &self.backend {
            Backend::Rayon(pool) => pool.spawn(task),
            Backend::Inline => task(),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
