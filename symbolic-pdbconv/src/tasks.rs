//! A minimal launch/join scheduler on top of a rayon thread pool.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

use crate::error::ConvertError;

/// The parked result of a task.
struct Slot<T> {
    result: Mutex<Option<thread::Result<T>>>,
    ready: Condvar,
}

impl<T> Slot<T> {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn fill(&self, result: thread::Result<T>) {
        *self.result.lock() = Some(result);
        self.ready.notify_all();
    }
}

/// Handle to a launched task.
///
/// Dropping the handle detaches the task; its result is discarded.
#[must_use = "tasks must be joined to obtain their result"]
pub struct Task<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Task<T> {
    /// Blocks until the task has finished and returns its output.
    ///
    /// If the task panicked, the panic is resumed on the calling thread.
    pub fn join(self) -> T {
        let mut result = self.slot.result.lock();
        loop {
            if let Some(result) = result.take() {
                return match result {
                    Ok(value) => value,
                    Err(payload) => panic::resume_unwind(payload),
                };
            }
            self.slot.ready.wait(&mut result);
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let done = self.slot.result.lock().is_some();
        f.debug_struct("Task").field("done", &done).finish()
    }
}

/// A pool of workers executing independent tasks.
///
/// Tasks never communicate with each other. Their only output is the value returned by
/// [`Task::join`].
pub struct TaskPool {
    pool: Option<rayon::ThreadPool>,
}

impl TaskPool {
    /// Creates a pool with the given number of worker threads.
    ///
    /// `None` uses rayon's default. `Some(0)` creates no workers and runs every task on the
    /// calling thread as it is launched.
    pub fn new(threads: Option<usize>) -> Result<Self, ConvertError> {
        let pool = match threads {
            Some(0) => None,
            threads => {
                let builder = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads.unwrap_or(0))
                    .thread_name(|index| format!("pdbconv-{index}"));
                Some(builder.build().map_err(ConvertError::ThreadPool)?)
            }
        };

        Ok(Self { pool })
    }

    /// The number of workers, zero if tasks run inline.
    pub fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map_or(0, rayon::ThreadPool::current_num_threads)
    }

    /// Schedules `work` and returns a handle to its result.
    pub fn launch<T, F>(&self, work: F) -> Task<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let slot = Arc::new(Slot::new());
        let task = Task { slot: slot.clone() };

        let run = move || slot.fill(panic::catch_unwind(AssertUnwindSafe(work)));
        match &self.pool {
            Some(pool) => pool.spawn(run),
            None => run(),
        }

        task
    }
}

impl fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("threads", &self.threads())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_join_in_launch_order() {
        let pool = TaskPool::new(Some(4)).unwrap();
        let tasks: Vec<_> = (0..32u64)
            .map(|i| pool.launch(move || (0..=i).sum::<u64>()))
            .collect();

        let sums: Vec<_> = tasks.into_iter().map(Task::join).collect();
        let expected: Vec<_> = (0..32u64).map(|i| i * (i + 1) / 2).collect();
        assert_eq!(sums, expected);
    }

    #[test]
    fn test_inline_pool() {
        let pool = TaskPool::new(Some(0)).unwrap();
        assert_eq!(pool.threads(), 0);

        let caller = thread::current().id();
        let task = pool.launch(move || thread::current().id() == caller);
        assert!(task.join());
    }

    #[test]
    fn test_panic_resumes_on_join() {
        let pool = TaskPool::new(Some(1)).unwrap();
        let task = pool.launch(|| -> u32 { panic!("boom") });
        let other = pool.launch(|| 7);

        let result = panic::catch_unwind(AssertUnwindSafe(|| task.join()));
        assert!(result.is_err());
        assert_eq!(other.join(), 7);
    }
}
