//! The worker thread and the loop it runs.

use crate::{
    dispatcher::Config,
    queue::TaskQueue,
};
use std::{
    cell::Cell,
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};


// source of dispatcher ids. 0 is reserved for "not a worker thread".
static NEXT_DISPATCHER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // id of the dispatcher whose worker loop is running on this thread, or 0.
    static WORKER_OF: Cell<u64> = const { Cell::new(0) };
}

/// Allocate a process-unique dispatcher id.
pub(crate) fn next_dispatcher_id() -> u64 {
    NEXT_DISPATCHER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Whether the current thread is the worker thread of the dispatcher with the given id.
pub(crate) fn is_worker_of(dispatcher_id: u64) -> bool {
    WORKER_OF.with(|cell| cell.get()) == dispatcher_id
}

/// Spawn a worker thread draining `queue` until a stop marker runs.
pub(crate) fn spawn(
    dispatcher_id: u64,
    queue: Arc<TaskQueue>,
    config: &Config,
) -> io::Result<JoinHandle<()>> {
    let mut builder = thread::Builder::new().name(config.thread_name.clone());
    if let Some(stack_size) = config.stack_size {
        builder = builder.stack_size(stack_size);
    }
    builder.spawn(move || run(dispatcher_id, &queue))
}

// the worker loop.
//
// waiting: suspended inside queue.pop() while the queue is empty.
// draining: running the popped task, outside the queue lock, so the task may itself push.
fn run(dispatcher_id: u64, queue: &TaskQueue) {
    WORKER_OF.with(|cell| cell.set(dispatcher_id));
    debug!(dispatcher = dispatcher_id, "worker started");

    let mut executed: u64 = 0;
    while !queue.is_stop_requested() {
        let task = queue.pop();
        task.run(queue);
        executed += 1;
        trace!(dispatcher = dispatcher_id, executed, "task executed");
    }

    WORKER_OF.with(|cell| cell.set(0));
    debug!(dispatcher = dispatcher_id, executed, left_behind = queue.len(), "worker exited");
}
