//! Single-threaded cooperative runtime for network and provider work.
//!
//! A current-thread tokio runtime lives on its own OS thread. Futures are
//! spawned from any thread; at most `concurrency` of them make progress at
//! once, the rest wait on a semaphore.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;

use encore_config::{log_worker_debug, log_worker_error, WorkerConfig};
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Semaphore};

use crate::error::{panic_message, Result, RuntimeError};

pub struct AsyncRuntime {
    handle: Handle,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    stop_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl AsyncRuntime {
    /// Start the runtime thread. `concurrency` is clamped to at least 1.
    pub fn new(concurrency: usize) -> Result<Self> {
        let concurrency = concurrency.max(1);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| RuntimeError::Startup {
                what: "async runtime",
                reason: e.to_string(),
            })?;
        let handle = runtime.handle().clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("encore-async".to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = stop_rx.await;
                });
                // Dropping the runtime here cancels whatever is still queued.
            })
            .map_err(|e| RuntimeError::Startup {
                what: "async runtime thread",
                reason: e.to_string(),
            })?;

        log_worker_debug!("Async runtime started", concurrency = concurrency);
        Ok(Self {
            handle,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    pub fn from_config(config: &WorkerConfig) -> Result<Self> {
        Self::new(config.async_concurrency)
    }

    /// Queue a future. It starts once a concurrency slot is free.
    pub fn spawn<F, T>(&self, future: F) -> AsyncJob<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let inner = self.handle.spawn(async move {
            // The semaphore is never closed, so acquiring only fails if it is.
            let _permit = semaphore.acquire_owned().await.ok();
            future.await
        });
        AsyncJob {
            inner,
            handle: self.handle.clone(),
        }
    }

    /// Jobs currently holding a concurrency slot
    pub fn in_flight(&self) -> usize {
        self.concurrency - self.semaphore.available_permits()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runtime handle, for code that needs to enter the runtime directly
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Stop the runtime thread. Unfinished jobs resolve to `ShutDown`.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log_worker_error!("Async runtime thread panicked");
            }
        }
    }
}

impl Drop for AsyncRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for AsyncRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncRuntime")
            .field("concurrency", &self.concurrency)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

/// Handle on a spawned future: await it, or block on it from a plain thread.
#[derive(Debug)]
pub struct AsyncJob<T> {
    inner: tokio::task::JoinHandle<T>,
    handle: Handle,
}

impl<T> AsyncJob<T> {
    /// Block the current thread until the job finishes.
    ///
    /// Must not be called from inside an async context.
    pub fn wait(self) -> Result<T> {
        let AsyncJob { inner, handle } = self;
        handle.block_on(async move { map_join(inner.await) })
    }

    pub fn abort(&self) {
        self.inner.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

impl<T> Future for AsyncJob<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx).map(map_join)
    }
}

fn map_join<T>(result: std::result::Result<T, tokio::task::JoinError>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_panic() => Err(RuntimeError::Panicked(panic_message(&*e.into_panic()))),
        Err(_) => Err(RuntimeError::ShutDown),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_spawn_and_wait() {
        let rt = AsyncRuntime::new(2).unwrap();
        let job = rt.spawn(async { 40 + 2 });
        assert_eq!(job.wait(), Ok(42));
    }

    #[test]
    fn test_panic_is_reported() {
        let rt = AsyncRuntime::new(1).unwrap();
        let job = rt.spawn(async {
            if true {
                panic!("async boom");
            }
            0u8
        });
        assert_eq!(job.wait(), Err(RuntimeError::Panicked("async boom".into())));
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let rt = AsyncRuntime::new(2).unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..6)
            .map(|_| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                rt.spawn(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for job in jobs {
            job.wait().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(rt.in_flight(), 0);
    }

    #[test]
    fn test_shutdown_cancels_pending() {
        let mut rt = AsyncRuntime::new(1).unwrap();
        let job = rt.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        rt.shutdown();
        assert!(job.is_finished());
        assert_eq!(job.wait(), Err(RuntimeError::ShutDown));
    }
}
