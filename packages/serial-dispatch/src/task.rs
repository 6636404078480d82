//! Deferred units of work.

use crate::{
    error::TaskFailure,
    oneshot::ResultSender,
    queue::TaskQueue,
};
use std::panic::{catch_unwind, AssertUnwindSafe};


/// A zero-argument unit of work owned by the queue until the worker pops and runs it.
pub(crate) struct Task(Body);

enum Body {
    // caller-supplied work, already wrapped to route its outcome somewhere.
    Work(Box<dyn FnOnce() + Send + 'static>),
    // internal marker that ends the worker loop once everything before it has run.
    Stop,
}

/// Run `f`, catching a panic as a [`TaskFailure`].
///
/// The dispatcher never observes state of `f` after it panics, so asserting unwind safety only
/// affects what `f` itself captured.
pub(crate) fn run_caught<F, R>(f: F) -> Result<R, TaskFailure>
where
    F: FnOnce() -> R,
{
    catch_unwind(AssertUnwindSafe(f)).map_err(TaskFailure::from_panic)
}

impl Task {
    /// Task with nobody to report to. A panic is logged rather than propagated.
    pub(crate) fn detached<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Task(Body::Work(Box::new(move || {
            if let Err(failure) = run_caught(f) {
                error!(%failure, "fire-and-forget task panicked");
            }
        })))
    }

    /// Task that resolves `send` with its return value or panic.
    ///
    /// If the task is dropped without running, `send` is dropped with it, which marks the result
    /// abandoned.
    pub(crate) fn with_result<F, R>(f: F, send: ResultSender<R>) -> Self
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        Task(Body::Work(Box::new(move || match run_caught(f) {
            Ok(val) => send.fulfil(val),
            Err(failure) => send.fail(failure),
        })))
    }

    /// The marker `stop` pushes behind all previously queued work.
    pub(crate) fn stop_marker() -> Self {
        Task(Body::Stop)
    }

    /// Run the task on the current thread. Never panics due to the task body.
    pub(crate) fn run(self, queue: &TaskQueue) {
        match self.0 {
            Body::Work(f) => f(),
            Body::Stop => queue.request_stop(),
        }
    }
}
