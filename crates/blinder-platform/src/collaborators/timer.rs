//! Timer collaborator.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::{PlatformError, PlatformResult};

pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// One-shot delayed callbacks.
pub trait Timer: Send + Sync {
    fn set_timer(&self, delay: Duration, callback: TimerCallback);
}

struct Entry {
    deadline: Instant,
    sequence: u64,
    callback: TimerCallback,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.sequence == other.sequence
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.deadline, self.sequence).cmp(&(other.deadline, other.sequence))
    }
}

#[derive(Default)]
struct Queue {
    entries: BinaryHeap<Reverse<Entry>>,
    next_sequence: u64,
    shutdown: bool,
}

#[derive(Default)]
struct Shared {
    queue: Mutex<Queue>,
    wake: Condvar,
}

/// A dedicated thread firing callbacks from a deadline heap.
///
/// Callbacks with equal deadlines fire in scheduling order. Callbacks still
/// pending when the timer is dropped never fire.
pub struct DefaultTimer {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl DefaultTimer {
    pub fn new() -> PlatformResult<Self> {
        let shared = Arc::new(Shared::default());
        let worker = shared.clone();
        let thread = std::thread::Builder::new()
            .name("blinder-timer".to_owned())
            .spawn(move || run_timer(&worker))
            .map_err(|e| {
                PlatformError::Io(std::io::Error::other(format!("failed to spawn timer thread: {e}")))
            })?;
        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Number of callbacks waiting to fire
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().entries.len()
    }
}

impl Timer for DefaultTimer {
    fn set_timer(&self, delay: Duration, callback: TimerCallback) {
        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            debug!("timer shut down; callback discarded");
            return;
        }
        let sequence = queue.next_sequence;
        queue.next_sequence += 1;
        queue.entries.push(Reverse(Entry {
            deadline: Instant::now() + delay,
            sequence,
            callback,
        }));
        self.shared.wake.notify_one();
    }
}

impl Drop for DefaultTimer {
    fn drop(&mut self) {
        let discarded = {
            let mut queue = self.shared.queue.lock();
            queue.shutdown = true;
            std::mem::take(&mut queue.entries)
        };
        self.shared.wake.notify_one();
        drop(discarded);

        if let Some(thread) = self.thread.lock().take() {
            if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
                error!("timer thread terminated abnormally");
            }
        }
    }
}

fn run_timer(shared: &Shared) {
    let mut queue = shared.queue.lock();
    loop {
        if queue.shutdown {
            break;
        }
        let next_deadline = queue.entries.peek().map(|Reverse(entry)| entry.deadline);
        match next_deadline {
            None => shared.wake.wait(&mut queue),
            Some(deadline) if deadline > Instant::now() => {
                shared.wake.wait_until(&mut queue, deadline);
            }
            Some(_) => {
                let Some(Reverse(entry)) = queue.entries.pop() else {
                    continue;
                };
                drop(queue);
                if catch_unwind(AssertUnwindSafe(entry.callback)).is_err() {
                    error!("timer callback panicked");
                }
                queue = shared.queue.lock();
            }
        }
    }
    debug!("timer thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_fires_in_deadline_order() {
        let timer = DefaultTimer::new().unwrap();
        let (tx, rx) = unbounded();
        for (label, delay) in [("late", 60), ("early", 10), ("middle", 30)] {
            let tx = tx.clone();
            timer.set_timer(
                Duration::from_millis(delay),
                Box::new(move || tx.send(label).unwrap()),
            );
        }
        let fired: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(fired, ["early", "middle", "late"]);
    }

    #[test]
    fn test_zero_delay_fires() {
        let timer = DefaultTimer::new().unwrap();
        let (tx, rx) = unbounded();
        timer.set_timer(Duration::ZERO, Box::new(move || tx.send(()).unwrap()));
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(timer.pending(), 0);
    }

    #[test]
    fn test_drop_discards_pending() {
        let (tx, rx) = unbounded::<()>();
        {
            let timer = DefaultTimer::new().unwrap();
            timer.set_timer(
                Duration::from_secs(60),
                Box::new(move || tx.send(()).unwrap()),
            );
            assert_eq!(timer.pending(), 1);
        }
        // The callback (and its sender) were dropped without firing.
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_panicking_callback_does_not_stop_timer() {
        let timer = DefaultTimer::new().unwrap();
        timer.set_timer(Duration::ZERO, Box::new(|| panic!("callback failure")));
        let (tx, rx) = unbounded();
        timer.set_timer(Duration::from_millis(5), Box::new(move || tx.send(()).unwrap()));
        rx.recv_timeout(Duration::from_secs(1)).unwrap();
    }
}
