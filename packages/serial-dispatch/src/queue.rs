//! Task queue shared between producers and the worker.
//!
//! A FIFO buffer of pending [`Task`]s behind a mutex, with a condvar the worker suspends on while
//! the buffer is empty. Any thread may push; only the worker pops.

use crate::task::Task;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, Ordering},
        Condvar,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};


/// Mutually exclusive, FIFO queue of tasks plus the worker's wake condition.
pub(crate) struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    // notified whenever a task is pushed.
    workable: Condvar,
    // set by the stop marker as it runs. the worker exits when it sees this between tasks.
    stop_requested: AtomicBool,
}

impl TaskQueue {
    /// Construct empty.
    pub(crate) fn new() -> Self {
        TaskQueue {
            tasks: Mutex::new(VecDeque::new()),
            workable: Condvar::new(),
            stop_requested: AtomicBool::new(false),
        }
    }

    // lock the buffer. task bodies never run while it is held, so poison carries no meaning.
    fn lock(&self) -> MutexGuard<'_, VecDeque<Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a task to the back of the queue and wake the worker.
    pub(crate) fn push(&self, task: Task) {
        let mut tasks = self.lock();
        tasks.push_back(task);
        drop(tasks);
        self.workable.notify_one();
    }

    /// Pop the front task, suspending the calling thread while the queue is empty.
    ///
    /// Only the worker calls this.
    pub(crate) fn pop(&self) -> Task {
        let mut tasks = self.lock();
        loop {
            if let Some(task) = tasks.pop_front() {
                return task;
            }
            tasks = self.workable.wait(tasks).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Remove and return every queued task, front to back.
    ///
    /// The caller should drop the returned tasks after releasing any locks of its own, since
    /// dropping a task drops whatever its body captured.
    pub(crate) fn take_all(&self) -> VecDeque<Task> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of queued tasks.
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Prepare for a new worker: clear any leftover tasks and the stop request.
    ///
    /// Returns the discarded tasks, for the same reason as [`take_all`](Self::take_all).
    pub(crate) fn reset(&self) -> VecDeque<Task> {
        let leftover = self.take_all();
        self.stop_requested.store(false, Ordering::SeqCst);
        leftover
    }

    /// Signal the worker to exit before its next task.
    pub(crate) fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested.
    pub(crate) fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}
