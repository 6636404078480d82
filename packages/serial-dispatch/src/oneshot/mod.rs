// implementation of the one-shot result channel.
//
// a task that somebody wants the result of is paired with one of these. the architecture is:
//
// ResultSender and ResultHandle both wrap around Arc<shared state>
//                                                   |
//          /----------------------------------------/
//          v
//       shared state
//          |
//          |------ a mutex around the slot state, which starts pending and makes exactly one
//          |       irreversible transition to fulfilled, failed, or abandoned. the pending state
//          |       holds the waker of the most recent poll, if the handle is being awaited.
//          |
//          \------ a condvar, notified upon that transition, for consumers that block a thread
//                  rather than await.
//
// the organization of these modules is as such:
//
//      core: the slot itself, and the sender and receiver halves of it, with a minimal API that
//       ^    is sound but panicky if misused.
//       |
//      api: the ResultHandle wrapper around the receiver half, which is what the crate exposes
//           publically, with blocking, non-blocking, deadline, and future-based ways of taking the
//           result.

pub(crate) mod core;
pub(crate) mod api;

pub(crate) use self::core::ResultSender;

/// Create a pending result channel.
pub(crate) fn channel<T>() -> (ResultSender<T>, api::ResultHandle<T>) {
    let (send, recv) = core::slot();
    (send, api::ResultHandle(recv))
}
