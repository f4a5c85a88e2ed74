//! A lazily resolved result shared by any number of consumers.
//!
//! The first resolution wins. Consumers either block on [`SharedOutcome::wait`]
//! or register a continuation, which is delivered through the executor. Once
//! resolved, reads are a lock-free load of the stored cell.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use scopeguard::ScopeGuard;
use tracing::debug;

use crate::error::PlatformError;
use crate::executor::{Executor, Rejected};

/// The stored result; failures are shared between all consumers.
pub type Outcome<T> = Result<T, Arc<PlatformError>>;

pub type Continuation<T> = Box<dyn FnOnce(Outcome<T>) + Send + 'static>;

pub struct SharedOutcome<T> {
    resolved: OnceLock<Outcome<T>>,
    waiters: Mutex<Vec<Continuation<T>>>,
    ready: Condvar,
    executor: Arc<dyn Executor>,
}

impl<T> SharedOutcome<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(executor: Arc<dyn Executor>) -> Arc<Self> {
        Arc::new(Self {
            resolved: OnceLock::new(),
            waiters: Mutex::new(Vec::new()),
            ready: Condvar::new(),
            executor,
        })
    }

    /// Store `outcome` unless already resolved. Returns whether this call won.
    pub fn resolve(&self, outcome: Outcome<T>) -> bool {
        let waiters = {
            let mut waiters = self.waiters.lock();
            if self.resolved.set(outcome).is_err() {
                return false;
            }
            self.ready.notify_all();
            std::mem::take(&mut *waiters)
        };
        if let Some(outcome) = self.resolved.get() {
            for continuation in waiters {
                self.deliver(continuation, outcome.clone());
            }
        }
        true
    }

    /// The result, if resolved.
    pub fn get(&self) -> Option<Outcome<T>> {
        self.resolved.get().cloned()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.resolved.get(), Some(Err(_)))
    }

    /// Block until resolved.
    pub fn wait(&self) -> Outcome<T> {
        if let Some(outcome) = self.get() {
            return outcome;
        }
        let mut waiters = self.waiters.lock();
        loop {
            if let Some(outcome) = self.resolved.get() {
                return outcome.clone();
            }
            self.ready.wait(&mut waiters);
        }
    }

    /// Block until resolved or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<T>> {
        if let Some(outcome) = self.get() {
            return Some(outcome);
        }
        let deadline = Instant::now() + timeout;
        let mut waiters = self.waiters.lock();
        loop {
            if let Some(outcome) = self.resolved.get() {
                return Some(outcome.clone());
            }
            if self.ready.wait_until(&mut waiters, deadline).timed_out() {
                return self.resolved.get().cloned();
            }
        }
    }

    /// Run `continuation` with the result once it is available.
    ///
    /// Fires exactly once, on the executor.
    pub fn on_resolved(&self, continuation: Continuation<T>) {
        let outcome = {
            let mut waiters = self.waiters.lock();
            match self.resolved.get() {
                Some(outcome) => outcome.clone(),
                None => {
                    waiters.push(continuation);
                    return;
                }
            }
        };
        self.deliver(continuation, outcome);
    }

    /// Runs inline when the executor refuses the task or drops it unrun.
    fn deliver(&self, continuation: Continuation<T>, outcome: Outcome<T>) {
        let pending = scopeguard::guard((continuation, outcome), |(continuation, outcome)| {
            debug!("executor stopped; delivering continuation inline");
            continuation(outcome);
        });
        let task = Box::new(move || {
            let (continuation, outcome) = ScopeGuard::into_inner(pending);
            continuation(outcome);
        });
        if let Err(Rejected(task)) = self.executor.dispatch(task) {
            drop(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ThreadPoolExecutor;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn executor() -> Arc<dyn Executor> {
        Arc::new(ThreadPoolExecutor::builder().threads(2).build().unwrap())
    }

    #[test]
    fn test_first_resolution_wins() {
        let outcome = SharedOutcome::<u32>::new(executor());
        assert!(!outcome.is_resolved());
        assert!(outcome.resolve(Ok(1)));
        assert!(!outcome.resolve(Ok(2)));
        assert!(!outcome.resolve(Err(Arc::new(PlatformError::ExecutorStopped))));
        assert_eq!(outcome.wait().unwrap(), 1);
        assert!(!outcome.is_failed());
    }

    #[test]
    fn test_blocking_waiters_are_released() {
        let outcome = SharedOutcome::<u32>::new(executor());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let outcome = outcome.clone();
                std::thread::spawn(move || outcome.wait().unwrap())
            })
            .collect();
        std::thread::sleep(Duration::from_millis(20));
        outcome.resolve(Ok(9));
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), 9);
        }
    }

    #[test]
    fn test_wait_timeout() {
        let outcome = SharedOutcome::<u32>::new(executor());
        assert!(outcome.wait_timeout(Duration::from_millis(20)).is_none());
        outcome.resolve(Ok(3));
        assert_eq!(outcome.wait_timeout(Duration::ZERO).unwrap().unwrap(), 3);
    }

    #[test]
    fn test_continuations_fire_once_before_and_after_resolution() {
        let outcome = SharedOutcome::<&'static str>::new(executor());
        let fired = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = unbounded();

        for _ in 0..3 {
            let fired = fired.clone();
            let tx = tx.clone();
            outcome.on_resolved(Box::new(move |result| {
                fired.fetch_add(1, Ordering::SeqCst);
                tx.send(result.unwrap()).unwrap();
            }));
        }
        outcome.resolve(Ok("ready"));
        outcome.resolve(Ok("ignored"));

        let late_tx = tx.clone();
        outcome.on_resolved(Box::new(move |result| late_tx.send(result.unwrap()).unwrap()));

        for _ in 0..4 {
            assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "ready");
        }
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_failure_is_shared() {
        let outcome = SharedOutcome::<u32>::new(executor());
        outcome.resolve(Err(Arc::new(PlatformError::ConstructionTimeout(10))));
        assert!(outcome.is_failed());
        let first = outcome.wait().unwrap_err();
        let second = outcome.get().unwrap().unwrap_err();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_continuation_runs_inline_when_executor_stopped() {
        let executor = executor();
        executor.stop();
        let outcome = SharedOutcome::<u32>::new(executor);
        outcome.resolve(Ok(5));
        let (tx, rx) = unbounded();
        outcome.on_resolved(Box::new(move |result| tx.send(result.unwrap()).unwrap()));
        assert_eq!(rx.try_recv().unwrap(), 5);
    }

    #[test]
    fn test_continuation_survives_stop_while_queued() {
        let executor: Arc<dyn Executor> =
            Arc::new(ThreadPoolExecutor::builder().threads(1).build().unwrap());
        let (release_tx, release_rx) = unbounded::<()>();
        executor
            .dispatch(Box::new(move || {
                let _ = release_rx.recv();
            }))
            .unwrap();

        let outcome = SharedOutcome::<u32>::new(executor.clone());
        let (tx, rx) = unbounded();
        outcome.on_resolved(Box::new(move |result| tx.send(result.unwrap()).unwrap()));
        outcome.resolve(Ok(8));

        let stopper = {
            let executor = executor.clone();
            std::thread::spawn(move || executor.stop())
        };
        while !executor.is_stopped() {
            std::thread::sleep(Duration::from_millis(1));
        }
        release_tx.send(()).unwrap();
        stopper.join().unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 8);
    }
}
