// exposed API of the result channel

use super::core::{self, Timeout};
use crate::error::*;
use std::{
    fmt::{self, Debug, Formatter},
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};


/// Handle to the eventual result of a task submitted with
/// [`exec_async_with_handle`](crate::Dispatcher::exec_async_with_handle)
///
/// The handle resolves exactly once, to one of:
///
/// - `Ok` with the task's return value, once the task has run.
/// - [`RecvError::TaskFailed`] if the task panicked, carrying the panic message.
/// - [`RecvError::Abandoned`] if the task was discarded without running.
///
/// It may be consumed by blocking the current thread ([`block`](Self::block) and its bounded
/// variants), by checking without blocking ([`try_now`](Self::try_now)), or by awaiting it as a
/// future. Dropping the handle does not cancel the task, it only discards its result.
pub struct ResultHandle<T>(pub(super) core::Receiver<T>);

impl<T> ResultHandle<T> {
    /// Block until the task resolves
    ///
    /// When this method returns, that counts as this handle resolving. This method will panic if
    /// this handle has already resolved.
    pub fn block(&mut self) -> Result<T, RecvError> {
        assert!(!self.is_terminated(), "ResultHandle.block called after terminated");
        self.0.wait(Timeout::Never).expect("wait timed out with Timeout::Never")
    }

    /// Shorthand for blocking on a handle that is no longer needed afterwards
    pub fn join(mut self) -> Result<T, RecvError> {
        self.block()
    }

    /// Try to take the result immediately without blocking
    ///
    /// If this method returns anything other than [`WouldBlockError`], that counts as this handle
    /// resolving. This method will panic if this handle has already resolved.
    pub fn try_now(&mut self) -> Result<T, TryRecvError> {
        assert!(!self.is_terminated(), "ResultHandle.try_now called after terminated");
        map_try_recv_result(self.0.wait(Timeout::NonBlocking))
    }

    /// Block until the task resolves or a timeout elapses
    ///
    /// If this method returns anything other than [`WouldBlockError`], that counts as this handle
    /// resolving. This method will panic if this handle has already resolved.
    pub fn block_timeout(&mut self, timeout: Duration) -> Result<T, TryRecvError> {
        assert!(!self.is_terminated(), "ResultHandle.block_timeout called after terminated");
        self.block_deadline(Instant::now() + timeout)
    }

    /// Block until the task resolves or the deadline is reached
    ///
    /// If this method returns anything other than [`WouldBlockError`], that counts as this handle
    /// resolving. This method will panic if this handle has already resolved.
    pub fn block_deadline(&mut self, deadline: Instant) -> Result<T, TryRecvError> {
        assert!(!self.is_terminated(), "ResultHandle.block_deadline called after terminated");
        map_try_recv_result(self.0.wait(Timeout::At(deadline)))
    }

    /// Whether this handle has already resolved
    pub fn is_terminated(&self) -> bool {
        self.0.is_terminated()
    }
}

fn map_try_recv_result<T>(result: Option<Result<T, RecvError>>) -> Result<T, TryRecvError> {
    match result {
        Some(result) => result.map_err(TryRecvError::from),
        None => Err(WouldBlockError.into()),
    }
}

impl<T> Future for ResultHandle<T> {
    type Output = Result<T, RecvError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Self::Output> {
        let this = self.get_mut();
        // for implementation of FusedFuture
        if this.is_terminated() {
            return Poll::Pending;
        }
        this.0.poll(cx)
    }
}

#[cfg(feature = "futures")]
impl<T> futures::future::FusedFuture for ResultHandle<T> {
    fn is_terminated(&self) -> bool {
        Self::is_terminated(self)
    }
}

impl<T> Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("ResultHandle")
            .field("terminated", &self.is_terminated())
            .finish()
    }
}
