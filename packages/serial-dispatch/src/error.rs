// dispatcher error types.

use std::{
    any::Any,
    fmt::{self, Debug, Formatter},
    io,
    panic::resume_unwind,
    sync::{Arc, Mutex, PoisonError},
};
use thiserror::Error;


// ==== base error types ====


/// Error for trying to submit work to a dispatcher which is not running
///
/// A dispatcher is not running if [`start`](crate::Dispatcher::start) was never called on it, or
/// if it has been stopped and not yet restarted.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("dispatcher is not running")]
pub struct NotRunningError;

/// Error for waiting on the result of a task which was discarded without ever running
///
/// This occurs when a task is submitted from the worker thread after the dispatcher has begun
/// stopping, in which case it lands behind the stop marker and is dropped with the worker.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("task was abandoned before it ran")]
pub struct AbandonedError;

/// Error for attempting to take a result with no or limited blocking, and the task not completing
/// immediately or by the specified deadline
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
#[error("task has not yet completed")]
pub struct WouldBlockError;

/// Error for a task which panicked while running
///
/// Keeps the original panic payload, so [`resume`](Self::resume) re-raises exactly what the task
/// panicked with. If the payload was a string, which is the case for all panics raised through
/// `panic!` with a message, that string is also available through [`message`](Self::message).
///
/// Clones share the payload. The first clone to resume takes it, and any later clone resumes with
/// the message alone.
#[derive(Clone, Error)]
#[error("task panicked: {}", .message.as_deref().unwrap_or("<non-string panic payload>"))]
pub struct TaskFailure {
    message: Option<String>,
    payload: Arc<Mutex<Option<Box<dyn Any + Send>>>>,
}

impl TaskFailure {
    /// Construct from a panic payload, as caught by `catch_unwind`.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload.downcast_ref::<String>().cloned()
            .or_else(|| payload.downcast_ref::<&'static str>().map(|&s| s.to_owned()));
        TaskFailure {
            message,
            payload: Arc::new(Mutex::new(Some(payload))),
        }
    }

    /// The message the task panicked with, if it had one
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Resume unwinding on the current thread with the original panic payload
    ///
    /// This is for callers that would rather have a task failure behave like a panic in their own
    /// call stack than handle it as a value.
    pub fn resume(self) -> ! {
        let payload = self.payload.lock().unwrap_or_else(PoisonError::into_inner).take();
        match (payload, self.message) {
            (Some(payload), _) => resume_unwind(payload),
            (None, Some(message)) => resume_unwind(Box::new(message)),
            (None, None) => resume_unwind(Box::new(())),
        }
    }
}

// two failures are equal if they carry the same message. payloads are opaque.
impl PartialEq for TaskFailure {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message
    }
}

impl Eq for TaskFailure {}

impl Debug for TaskFailure {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("TaskFailure")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Error for failing to start a dispatcher's worker thread
#[derive(Debug, Error)]
#[error("failed to spawn dispatcher worker thread")]
pub struct StartError(#[from] pub io::Error);


// ==== compound error types ====


macro_rules! compound_from {
    ($compound:ident {$(
        $variant:ident($inner:ty),
    )*})=>{$(
        impl From<$inner> for $compound {
            fn from(inner: $inner) -> Self {
                Self::$variant(inner)
            }
        }
    )*};
}

/// Terminal error state for taking the result of a task
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum RecvError {
    /// The task panicked
    #[error(transparent)]
    TaskFailed(TaskFailure),
    /// The task was discarded without running
    #[error(transparent)]
    Abandoned(AbandonedError),
}

compound_from!(RecvError {
    TaskFailed(TaskFailure),
    Abandoned(AbandonedError),
});

/// Error for taking the result of a task with no or limited blocking
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum TryRecvError {
    /// The task reached some terminal error state
    #[error(transparent)]
    Terminal(RecvError),
    /// The task did not complete immediately or by the specified deadline
    #[error(transparent)]
    WouldBlock(WouldBlockError),
}

compound_from!(TryRecvError {
    Terminal(RecvError),
    WouldBlock(WouldBlockError),
});

/// Error for running a task synchronously on a dispatcher
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum SyncError {
    /// The dispatcher was not running, so the task was never submitted
    #[error(transparent)]
    NotRunning(NotRunningError),
    /// The task panicked
    #[error(transparent)]
    TaskFailed(TaskFailure),
    /// The task was discarded without running
    #[error(transparent)]
    Abandoned(AbandonedError),
}

compound_from!(SyncError {
    NotRunning(NotRunningError),
    TaskFailed(TaskFailure),
    Abandoned(AbandonedError),
});

impl From<RecvError> for SyncError {
    fn from(error: RecvError) -> Self {
        match error {
            RecvError::TaskFailed(e) => SyncError::TaskFailed(e),
            RecvError::Abandoned(e) => SyncError::Abandoned(e),
        }
    }
}
