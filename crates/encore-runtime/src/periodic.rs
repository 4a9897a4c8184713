//! Periodic tasks dispatched onto the worker pool.
//!
//! Two schedules are supported:
//!
//! - **Fixed**: run every `interval`.
//! - **Backoff**: the task reports success with its `bool` return value.
//!   Success doubles the interval up to `ceiling`; failure resets it to
//!   `floor`. A panic counts as a failure.
//!
//! A single ticker thread wakes every `tick`, and hands each due task to
//! the pool. A task that is still running is never dispatched again.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use encore_config::{log_worker_debug, log_worker_error};
use parking_lot::Mutex;

use crate::error::{panic_message, Result, RuntimeError};
use crate::pool::WorkerPool;

/// Default ticker resolution
pub const DEFAULT_TICK: Duration = Duration::from_millis(50);

/// How a periodic task is rescheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Fixed { interval: Duration },
    Backoff { floor: Duration, ceiling: Duration },
}

impl Schedule {
    fn validate(&self, name: &str) -> Result<()> {
        let invalid = |reason| RuntimeError::InvalidSchedule {
            name: name.to_string(),
            reason,
        };
        match *self {
            Schedule::Fixed { interval } if interval.is_zero() => {
                Err(invalid("interval must be positive"))
            }
            Schedule::Backoff { floor, .. } if floor.is_zero() => {
                Err(invalid("floor must be positive"))
            }
            Schedule::Backoff { floor, ceiling } if ceiling < floor => {
                Err(invalid("ceiling must not be below the floor"))
            }
            _ => Ok(()),
        }
    }

    fn initial_interval(&self) -> Duration {
        match *self {
            Schedule::Fixed { interval } => interval,
            Schedule::Backoff { floor, .. } => floor,
        }
    }
}

/// Interval after one run of a backoff task.
pub fn next_interval(
    current: Duration,
    floor: Duration,
    ceiling: Duration,
    success: bool,
) -> Duration {
    if success {
        current.saturating_mul(2).min(ceiling)
    } else {
        floor
    }
}

enum TaskFn {
    Fixed(Box<dyn FnMut() + Send>),
    Backoff(Box<dyn FnMut() -> bool + Send>),
}

struct SlotState {
    interval: Duration,
    next_run: Instant,
    running: bool,
    runs: u64,
}

struct TaskSlot {
    name: String,
    schedule: Schedule,
    task: Mutex<TaskFn>,
    state: Mutex<SlotState>,
}

impl TaskSlot {
    /// Body executed on a pool thread.
    fn run(self: Arc<Self>) {
        let outcome = {
            let mut task = self.task.lock();
            catch_unwind(AssertUnwindSafe(|| match &mut *task {
                TaskFn::Fixed(f) => {
                    f();
                    true
                }
                TaskFn::Backoff(f) => f(),
            }))
        };
        let success = match outcome {
            Ok(success) => success,
            Err(payload) => {
                log_worker_error!(
                    "Periodic task panicked",
                    task = self.name.as_str(),
                    panic = panic_message(&*payload).as_str()
                );
                false
            }
        };

        let mut state = self.state.lock();
        if let Schedule::Backoff { floor, ceiling } = self.schedule {
            state.interval = next_interval(state.interval, floor, ceiling, success);
            state.next_run = Instant::now() + state.interval;
        }
        state.runs += 1;
        state.running = false;
    }
}

/// Registry of periodic tasks plus the ticker that drives them
pub struct PeriodicScheduler {
    pool: Arc<WorkerPool>,
    tick: Duration,
    tasks: Arc<Mutex<Vec<Arc<TaskSlot>>>>,
    stop_tx: Option<Sender<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl PeriodicScheduler {
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self::with_tick(pool, DEFAULT_TICK)
    }

    pub fn with_tick(pool: Arc<WorkerPool>, tick: Duration) -> Self {
        Self {
            pool,
            tick: tick.max(Duration::from_millis(1)),
            tasks: Arc::new(Mutex::new(Vec::new())),
            stop_tx: None,
            ticker: None,
        }
    }

    /// Run `f` every `interval`. The first run happens one interval after
    /// registration.
    pub fn register_fixed(
        &self,
        name: &str,
        interval: Duration,
        f: impl FnMut() + Send + 'static,
    ) -> Result<()> {
        self.register(name, Schedule::Fixed { interval }, TaskFn::Fixed(Box::new(f)))
    }

    /// Run `f` with a dynamic interval between `floor` and `ceiling`.
    pub fn register_backoff(
        &self,
        name: &str,
        floor: Duration,
        ceiling: Duration,
        f: impl FnMut() -> bool + Send + 'static,
    ) -> Result<()> {
        self.register(
            name,
            Schedule::Backoff { floor, ceiling },
            TaskFn::Backoff(Box::new(f)),
        )
    }

    fn register(&self, name: &str, schedule: Schedule, task: TaskFn) -> Result<()> {
        schedule.validate(name)?;
        let mut tasks = self.tasks.lock();
        if tasks.iter().any(|t| t.name == name) {
            return Err(RuntimeError::InvalidSchedule {
                name: name.to_string(),
                reason: "a task with this name is already registered",
            });
        }
        let interval = schedule.initial_interval();
        tasks.push(Arc::new(TaskSlot {
            name: name.to_string(),
            schedule,
            task: Mutex::new(task),
            state: Mutex::new(SlotState {
                interval,
                next_run: Instant::now() + interval,
                running: false,
                runs: 0,
            }),
        }));
        log_worker_debug!("Registered periodic task", task = name);
        Ok(())
    }

    /// Remove a task. A run already in progress finishes normally.
    pub fn unregister(&self, name: &str) -> bool {
        let mut tasks = self.tasks.lock();
        let before = tasks.len();
        tasks.retain(|t| t.name != name);
        tasks.len() != before
    }

    /// Current interval of a task
    pub fn interval_of(&self, name: &str) -> Option<Duration> {
        let slot = self.find(name)?;
        let interval = slot.state.lock().interval;
        Some(interval)
    }

    /// Completed runs of a task
    pub fn runs_of(&self, name: &str) -> Option<u64> {
        let slot = self.find(name)?;
        let runs = slot.state.lock().runs;
        Some(runs)
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.lock().iter().map(|t| t.name.clone()).collect()
    }

    fn find(&self, name: &str) -> Option<Arc<TaskSlot>> {
        self.tasks.lock().iter().find(|t| t.name == name).cloned()
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Start the ticker thread. Calling it twice is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.ticker.is_some() {
            return Ok(());
        }
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let pool = Arc::clone(&self.pool);
        let tasks = Arc::clone(&self.tasks);
        let tick = self.tick;

        let ticker = std::thread::Builder::new()
            .name("encore-periodic".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(tick) {
                    Err(RecvTimeoutError::Timeout) => dispatch_due(&pool, &tasks),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| RuntimeError::Startup {
                what: "periodic ticker",
                reason: e.to_string(),
            })?;

        self.stop_tx = Some(stop_tx);
        self.ticker = Some(ticker);
        Ok(())
    }

    /// Stop the ticker. Runs already handed to the pool still complete.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(ticker) = self.ticker.take() {
            if ticker.join().is_err() {
                log_worker_error!("Periodic ticker thread panicked");
            }
        }
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PeriodicScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicScheduler")
            .field("tick", &self.tick)
            .field("tasks", &self.task_names())
            .field("running", &self.is_running())
            .finish()
    }
}

fn dispatch_due(pool: &WorkerPool, tasks: &Mutex<Vec<Arc<TaskSlot>>>) {
    let now = Instant::now();
    let due: Vec<Arc<TaskSlot>> = tasks
        .lock()
        .iter()
        .filter(|slot| {
            let mut state = slot.state.lock();
            if state.running || state.next_run > now {
                return false;
            }
            state.running = true;
            if let Schedule::Fixed { interval } = slot.schedule {
                state.next_run = now + interval;
            }
            true
        })
        .cloned()
        .collect();

    for slot in due {
        pool.execute(move || slot.run());
    }
}
