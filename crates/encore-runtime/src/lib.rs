//! # encore-runtime
//!
//! Execution surfaces shared by the stores and their consumers.
//!
//! Handles:
//! - A bounded [`WorkerPool`] for jobs that block on disk or CPU
//! - A [`PeriodicScheduler`] with fixed and dynamic-backoff schedules
//! - An [`AsyncRuntime`]: one cooperative thread for network work
//!
//! Stores never spawn threads. Callers decide which surface a blocking
//! store call runs on.

pub mod async_rt;
pub mod error;
pub mod periodic;
pub mod pool;

use std::sync::Arc;

use encore_config::WorkerConfig;

pub use async_rt::{AsyncJob, AsyncRuntime};
pub use error::{Result, RuntimeError};
pub use periodic::{next_interval, PeriodicScheduler, Schedule};
pub use pool::{default_thread_count, Job, JobHandle, WorkerPool};

/// The three surfaces wired together from one [`WorkerConfig`].
#[derive(Debug)]
pub struct Runtime {
    pub pool: Arc<WorkerPool>,
    pub periodic: PeriodicScheduler,
    pub io: AsyncRuntime,
}

impl Runtime {
    /// Build the pool and async runtime and start the periodic ticker.
    pub fn start(config: &WorkerConfig) -> Result<Self> {
        let pool = Arc::new(WorkerPool::from_config(config));
        let mut periodic = PeriodicScheduler::new(Arc::clone(&pool));
        periodic.start()?;
        let io = AsyncRuntime::from_config(config)?;
        Ok(Self { pool, periodic, io })
    }

    /// Stop the ticker, then the async runtime. Pool jobs already queued
    /// still run.
    pub fn shutdown(&mut self) {
        self.periodic.shutdown();
        self.io.shutdown();
    }
}
