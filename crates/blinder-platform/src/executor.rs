//! Deferred work execution
//!
//! The platform never runs construction steps or collaborator completions on
//! the caller's thread; it hands them to an [`Executor`]. The default
//! [`ThreadPoolExecutor`] is a fixed pool of named workers draining an
//! unbounded queue.
//!
//! # Example
//!
//! ```
//! use blinder_platform::{Executor, ThreadPoolExecutor};
//!
//! let executor = ThreadPoolExecutor::builder().threads(2).build().unwrap();
//! executor.dispatch(Box::new(|| println!("deferred"))).unwrap();
//! executor.stop();
//! ```

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::Mutex;
use tracing::{debug, error, info_span, trace};

use crate::error::{PlatformError, PlatformResult};

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Returned by [`Executor::dispatch`] when the executor no longer accepts
/// work; carries the task back to the caller.
pub struct Rejected(pub Task);

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Rejected(..)")
    }
}

/// Runs tasks asynchronously.
///
/// Ordering between tasks is not guaranteed. Each accepted task runs at most
/// once; a task's outcome is never reported back to the dispatcher.
pub trait Executor: Send + Sync {
    /// Enqueue `task`. After [`stop`](Self::stop) the task is handed back.
    fn dispatch(&self, task: Task) -> Result<(), Rejected>;

    /// Stop accepting work. Running tasks may finish; queued tasks are
    /// dropped without running.
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

/// Statistics about executor operation
///
/// All counters are atomic and can be read at any time without locking.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    /// Tasks accepted by `dispatch`
    pub tasks_dispatched: AtomicU64,
    /// Tasks that ran to completion
    pub tasks_completed: AtomicU64,
    /// Tasks that panicked
    pub tasks_panicked: AtomicU64,
    /// Tasks refused or discarded because of `stop`
    pub tasks_dropped: AtomicU64,
}

impl ExecutorStats {
    /// Get snapshot of current stats
    pub fn snapshot(&self) -> ExecutorStatsSnapshot {
        ExecutorStatsSnapshot {
            tasks_dispatched: self.tasks_dispatched.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            tasks_dropped: self.tasks_dropped.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of executor statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorStatsSnapshot {
    pub tasks_dispatched: u64,
    pub tasks_completed: u64,
    pub tasks_panicked: u64,
    pub tasks_dropped: u64,
}

/// Builder for a [`ThreadPoolExecutor`]
pub struct ThreadPoolExecutorBuilder {
    threads: usize,
    name_prefix: String,
}

impl Default for ThreadPoolExecutorBuilder {
    fn default() -> Self {
        Self {
            threads: num_cpus::get().max(1),
            name_prefix: "blinder-executor".to_owned(),
        }
    }
}

impl ThreadPoolExecutorBuilder {
    /// Set the number of worker threads
    ///
    /// Default is the number of CPU cores.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Prefix for worker thread names
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Spawn the workers
    pub fn build(self) -> PlatformResult<ThreadPoolExecutor> {
        ThreadPoolExecutor::new_with_config(self)
    }
}

/// Fixed pool of worker threads over an unbounded queue
pub struct ThreadPoolExecutor {
    task_tx: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stopped: Arc<AtomicBool>,
    stats: Arc<ExecutorStats>,
}

impl ThreadPoolExecutor {
    /// Create an executor with one worker per CPU
    pub fn new() -> PlatformResult<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ThreadPoolExecutorBuilder {
        ThreadPoolExecutorBuilder::default()
    }

    fn new_with_config(config: ThreadPoolExecutorBuilder) -> PlatformResult<Self> {
        let (task_tx, task_rx) = unbounded::<Task>();
        let stopped = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(ExecutorStats::default());

        let mut workers = Vec::with_capacity(config.threads);
        for i in 0..config.threads {
            let rx = task_rx.clone();
            let stopped = stopped.clone();
            let stats = stats.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}-{}", config.name_prefix, i))
                .spawn(move || run_worker(rx, stopped, stats))
                .map_err(|e| {
                    PlatformError::Io(std::io::Error::other(format!(
                        "failed to spawn executor worker: {e}"
                    )))
                })?;
            workers.push(handle);
        }

        Ok(Self {
            task_tx: Mutex::new(Some(task_tx)),
            workers: Mutex::new(workers),
            stopped,
            stats,
        })
    }

    pub fn stats(&self) -> &ExecutorStats {
        &self.stats
    }

    /// Number of worker threads still attached
    pub fn pool_size(&self) -> usize {
        self.workers.lock().len()
    }
}

impl Executor for ThreadPoolExecutor {
    fn dispatch(&self, task: Task) -> Result<(), Rejected> {
        let tx = self.task_tx.lock();
        let Some(tx) = tx.as_ref().filter(|_| !self.stopped.load(Ordering::SeqCst)) else {
            self.stats.tasks_dropped.fetch_add(1, Ordering::Relaxed);
            trace!("task refused by stopped executor");
            return Err(Rejected(task));
        };
        self.stats.tasks_dispatched.fetch_add(1, Ordering::Relaxed);
        tx.send(task).map_err(|e| Rejected(e.into_inner()))
    }

    /// Joins every worker except the calling one, so a task may stop the
    /// executor it runs on.
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        // Disconnecting the queue lets idle workers exit.
        drop(self.task_tx.lock().take());

        let current = std::thread::current().id();
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                error!("executor worker terminated abnormally");
            }
        }
        debug!(stats = ?self.stats.snapshot(), "executor stopped");
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for ThreadPoolExecutor {
    fn drop(&mut self) {
        if !self.workers.lock().is_empty() {
            self.stop();
        }
    }
}

fn run_worker(task_rx: Receiver<Task>, stopped: Arc<AtomicBool>, stats: Arc<ExecutorStats>) {
    let thread_name = std::thread::current()
        .name()
        .unwrap_or("blinder-executor")
        .to_string();
    let _span = info_span!("executor_worker", name = %thread_name).entered();
    debug!("Worker starting");

    for task in task_rx.iter() {
        if stopped.load(Ordering::SeqCst) {
            stats.tasks_dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        execute_with_panic_handler(task, &stats);
    }

    debug!("Worker stopped");
}

fn execute_with_panic_handler(task: Task, stats: &ExecutorStats) {
    match catch_unwind(AssertUnwindSafe(task)) {
        Ok(()) => {
            stats.tasks_completed.fetch_add(1, Ordering::Relaxed);
        }
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<&str>() {
                format!("Task panic: {}", s)
            } else if let Some(s) = panic.downcast_ref::<String>() {
                format!("Task panic: {}", s)
            } else {
                "Task panic: unknown error".to_string()
            };
            error!("{}", message);
            stats.tasks_panicked.fetch_add(1, Ordering::Relaxed);
        }
    }
}
