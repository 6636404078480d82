// minimal safe API for the result channel. the exposed API is a convenience wrapper around this.

use crate::error::{AbandonedError, RecvError, TaskFailure};
use std::{
    mem::replace,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
    time::Instant,
};


// construct a pending slot and its two halves.
pub(crate) fn slot<T>() -> (ResultSender<T>, Receiver<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending(None)),
        cond: Condvar::new(),
    });
    (ResultSender(Some(Arc::clone(&shared))), Receiver(Some(shared)))
}

// slot shared state.
struct Shared<T> {
    state: Mutex<State<T>>,
    cond: Condvar,
}

// slot state.
//
// - begins as pending.
// - the sender moves it out of pending exactly once, into fulfilled, failed, or abandoned.
// - the receiver moves it from any of those three into taken exactly once.
enum State<T> {
    // not yet resolved. holds the waker of the most recent poll, if any.
    Pending(Option<Waker>),
    // the task returned a value.
    Fulfilled(T),
    // the task panicked.
    Failed(TaskFailure),
    // the sender was dropped without resolving.
    Abandoned,
    // the receiver has taken the resolution.
    Taken,
}

impl<T> Shared<T> {
    // lock the state. no user code runs while it is locked, so poison carries no meaning here.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // move out of the pending state and wake anyone waiting.
    fn resolve(&self, resolved: State<T>) {
        let mut lock = self.lock();
        debug_assert!(matches!(&*lock, State::Pending(_)), "slot resolved twice (internal bug)");
        let prev = replace(&mut *lock, resolved);
        drop(lock);
        self.cond.notify_all();
        if let State::Pending(Some(waker)) = prev {
            waker.wake();
        }
    }
}

// timeout for blocking on a slot.
pub(crate) enum Timeout {
    // never time out.
    Never,
    // time out at the given deadline.
    At(Instant),
    // time out if the slot is not already resolved.
    NonBlocking,
}


// ==== sender half ====


// sender half of a result slot. resolving consumes it, so it can resolve at most once. dropping it
// unresolved marks the slot abandoned.
pub(crate) struct ResultSender<T>(Option<Arc<Shared<T>>>);

impl<T> ResultSender<T> {
    // resolve the slot with the task's return value.
    pub(crate) fn fulfil(mut self, val: T) {
        if let Some(shared) = self.0.take() {
            shared.resolve(State::Fulfilled(val));
        }
    }

    // resolve the slot with the task's panic.
    pub(crate) fn fail(mut self, failure: TaskFailure) {
        if let Some(shared) = self.0.take() {
            shared.resolve(State::Failed(failure));
        }
    }
}

impl<T> Drop for ResultSender<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.0.take() {
            shared.resolve(State::Abandoned);
        }
    }
}


// ==== receiver half ====


// receiver half of a result slot. becomes terminated once it has taken the resolution.
pub(crate) struct Receiver<T>(Option<Arc<Shared<T>>>);

// take a non-pending state, leaving taken behind.
fn take<T>(state: &mut State<T>) -> Result<T, RecvError> {
    match replace(state, State::Taken) {
        State::Fulfilled(val) => Ok(val),
        State::Failed(failure) => Err(failure.into()),
        State::Abandoned => Err(AbandonedError.into()),
        State::Pending(_) | State::Taken => unreachable!("take called on unresolved slot"),
    }
}

impl<T> Receiver<T> {
    // whether the resolution has already been taken.
    pub(crate) fn is_terminated(&self) -> bool {
        self.0.is_none()
    }

    // poll for the resolution, installing the context's waker if still pending.
    //
    // panics if already terminated.
    pub(crate) fn poll(&mut self, cx: &mut Context) -> Poll<Result<T, RecvError>> {
        let shared = self.0.as_ref().expect("result slot polled after already taken");
        let mut lock = shared.lock();
        if let State::Pending(waker) = &mut *lock {
            if waker.as_ref().is_none_or(|w| !w.will_wake(cx.waker())) {
                *waker = Some(cx.waker().clone());
            }
            return Poll::Pending;
        }
        let result = take(&mut *lock);
        drop(lock);
        self.0 = None;
        Poll::Ready(result)
    }

    // block the current thread until resolved or the timeout is reached, in which case return
    // none.
    //
    // panics if already terminated.
    pub(crate) fn wait(&mut self, timeout: Timeout) -> Option<Result<T, RecvError>> {
        let shared = self.0.as_ref().expect("result slot waited on after already taken");
        let mut lock = shared.lock();
        while let State::Pending(_) = &*lock {
            match &timeout {
                // block on condvar indefinitely
                &Timeout::Never => {
                    lock = shared.cond.wait(lock).unwrap_or_else(PoisonError::into_inner);
                }

                // block on condvar until deadline, at which point return none
                &Timeout::At(deadline) => {
                    let duration = deadline.checked_duration_since(Instant::now())?;
                    lock = shared.cond.wait_timeout(lock, duration)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }

                // dont block, return none instead
                &Timeout::NonBlocking => return None,
            }
        }
        let result = take(&mut *lock);
        drop(lock);
        self.0 = None;
        Some(result)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn fulfilled_before_wait() {
        let (send, mut recv) = slot();
        send.fulfil(5);
        assert_eq!(recv.wait(Timeout::NonBlocking), Some(Ok(5)));
        assert!(recv.is_terminated());
    }

    #[test]
    fn dropped_sender_abandons() {
        let (send, mut recv) = slot::<()>();
        drop(send);
        assert_eq!(recv.wait(Timeout::Never), Some(Err(AbandonedError.into())));
    }

    #[test]
    fn pending_times_out() {
        let (_send, mut recv) = slot::<()>();
        assert_eq!(recv.wait(Timeout::NonBlocking), None);
        let deadline = Instant::now() + Duration::from_millis(20);
        assert_eq!(recv.wait(Timeout::At(deadline)), None);
        assert!(Instant::now() >= deadline);
        assert!(!recv.is_terminated());
    }

    #[test]
    fn wait_wakes_on_fulfil_from_other_thread() {
        let (send, mut recv) = slot();
        let join = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            send.fulfil("done");
        });
        assert_eq!(recv.wait(Timeout::Never), Some(Ok("done")));
        join.join().unwrap();
    }

    #[test]
    fn failure_is_delivered() {
        let (send, mut recv) = slot::<u8>();
        let payload = std::panic::catch_unwind(|| panic!("nope")).unwrap_err();
        send.fail(TaskFailure::from_panic(payload));
        match recv.wait(Timeout::Never) {
            Some(Err(RecvError::TaskFailed(failure))) => assert_eq!(failure.message(), Some("nope")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    #[should_panic(expected = "after already taken")]
    fn wait_after_taken_panics() {
        let (send, mut recv) = slot();
        send.fulfil(());
        let _ = recv.wait(Timeout::Never);
        let _ = recv.wait(Timeout::Never);
    }
}
