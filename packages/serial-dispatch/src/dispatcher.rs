//! The dispatcher: lifecycle control and the submission API.

use crate::{
    error::*,
    oneshot::{self, api::ResultHandle},
    queue::TaskQueue,
    task::{self, Task},
    worker,
};
use std::{
    fmt::{self, Debug, Formatter},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
    thread::JoinHandle,
};


const DEFAULT_THREAD_NAME: &str = "serial-dispatch";


// worker thread configuration, fixed when the dispatcher is built.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) thread_name: String,
    pub(crate) stack_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            thread_name: DEFAULT_THREAD_NAME.to_owned(),
            stack_size: None,
        }
    }
}

// state shared by the dispatcher and all its handles.
struct Inner {
    // process-unique, used to recognize this dispatcher's worker thread.
    id: u64,
    queue: Arc<TaskQueue>,
    // written only while holding the lifecycle lock. readable without it, possibly stale.
    running: AtomicBool,
    // lifecycle exclusion domain. held across start and stop, and briefly by external producers
    // while they check running and enqueue.
    lifecycle: Mutex<Lifecycle>,
    config: Config,
}

// state guarded by the lifecycle lock.
struct Lifecycle {
    // some if and only if running.
    worker: Option<JoinHandle<()>>,
}

impl Inner {
    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    // internal enqueue. the lifecycle reference is proof that the caller holds the lifecycle lock.
    fn enqueue(&self, _lifecycle: &Lifecycle, task: Task) {
        self.queue.push(task);
    }

    // public enqueue path, deciding between the worker's own path and the external path.
    fn submit(&self, task: Task) -> Result<(), NotRunningError> {
        if worker::is_worker_of(self.id) {
            // the lifecycle lock may be held by a stop waiting on this very thread, so the worker
            // must not take it. the worker only exists while running, so no check is needed.
            debug_assert!(self.is_running());
            self.queue.push(task);
            return Ok(());
        }

        let lifecycle = self.lock_lifecycle();
        if !self.is_running() {
            drop(lifecycle);
            warn!(dispatcher = self.id, "rejecting task submitted to stopped dispatcher");
            return Err(NotRunningError);
        }
        self.enqueue(&lifecycle, task);
        Ok(())
    }

    fn exec_sync<F, R>(&self, f: F) -> Result<R, SyncError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if worker::is_worker_of(self.id) {
            // running is only cleared after the worker has exited.
            debug_assert!(self.is_running());
            // the worker is the only consumer, so waiting on the queue from here would never
            // finish. run in place instead, ahead of anything queued.
            trace!(dispatcher = self.id, "running reentrant sync task in place");
            return task::run_caught(f).map_err(SyncError::from);
        }

        let (send, mut handle) = oneshot::channel();
        self.submit(Task::with_result(f, send))?;
        handle.block().map_err(SyncError::from)
    }

    fn exec_async_with_handle<F, R>(&self, f: F) -> Result<ResultHandle<R>, NotRunningError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (send, handle) = oneshot::channel();
        self.submit(Task::with_result(f, send))?;
        Ok(handle)
    }
}


/// Builder for a [`Dispatcher`]
///
/// Configures the worker thread each run of the dispatcher spawns.
#[derive(Debug, Clone, Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    /// Construct with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name given to the worker thread
    ///
    /// Defaults to `"serial-dispatch"`.
    pub fn set_thread_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.config.thread_name = name.into();
        self
    }

    /// Ownership-chaining version of [`set_thread_name`](Self::set_thread_name)
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.set_thread_name(name);
        self
    }

    /// Set the stack size of the worker thread, in bytes
    ///
    /// Defaults to the standard library's default for spawned threads.
    pub fn set_stack_size(&mut self, stack_size: usize) -> &mut Self {
        self.config.stack_size = Some(stack_size);
        self
    }

    /// Ownership-chaining version of [`set_stack_size`](Self::set_stack_size)
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.set_stack_size(stack_size);
        self
    }

    /// Build a dispatcher, not yet running
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handle: Handle(Arc::new(Inner {
                id: worker::next_dispatcher_id(),
                queue: Arc::new(TaskQueue::new()),
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(Lifecycle { worker: None }),
                config: self.config,
            })),
        }
    }

    /// Build a dispatcher and start it
    pub fn start(self) -> Result<Dispatcher, StartError> {
        let dispatcher = self.build();
        dispatcher.start()?;
        Ok(dispatcher)
    }
}


/// Runs submitted work, one task at a time, on a single dedicated worker thread
///
/// Tasks run in the order they are enqueued. Work can be submitted either without waiting
/// ([`exec_async`](Self::exec_async), [`exec_async_with_handle`](Self::exec_async_with_handle)) or
/// by blocking until it has run ([`exec_sync`](Self::exec_sync)).
///
/// Code running on the worker may submit more work. Its `exec_sync` calls run in place,
/// immediately, on the worker's own call stack, since blocking the worker on its own queue would
/// never finish. Its `exec_async` calls enqueue at the back as usual.
///
/// A dispatcher starts out stopped. It may be started and stopped any number of times, and it is
/// stopped when dropped. Submissions while stopped fail with [`NotRunningError`].
///
/// Neither [`stop`](Self::stop) nor dropping the dispatcher may happen on its own worker thread,
/// since that would mean the worker waiting for itself to exit.
///
/// To let tasks submit further work, give them a [`Handle`] from [`handle`](Self::handle).
pub struct Dispatcher {
    handle: Handle,
}

impl Dispatcher {
    /// Construct a dispatcher with default settings, not yet running
    pub fn new() -> Self {
        Builder::new().build()
    }

    /// Construct a [`Builder`] for configuring a dispatcher
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Start the worker, unless already running
    ///
    /// Anything left in the queue from a previous run is discarded, so tasks never survive a
    /// stop and start cycle. Fails only if the worker thread cannot be spawned, in which case the
    /// dispatcher remains stopped.
    pub fn start(&self) -> Result<(), StartError> {
        let inner = &self.handle.0;
        let mut lifecycle = inner.lock_lifecycle();
        if lifecycle.worker.is_some() {
            return Ok(());
        }

        let leftover = inner.queue.reset();
        lifecycle.worker = Some(worker::spawn(inner.id, Arc::clone(&inner.queue), &inner.config)?);
        inner.running.store(true, Ordering::Release);
        drop(lifecycle);

        if !leftover.is_empty() {
            warn!(dispatcher = inner.id, count = leftover.len(), "discarding tasks from previous run");
        }
        drop(leftover);
        debug!(dispatcher = inner.id, "dispatcher started");
        Ok(())
    }

    /// Stop the worker, unless not running
    ///
    /// Pushes a stop marker behind all previously queued work and blocks until the worker has run
    /// everything up to and including the marker and exited. Tasks the worker itself enqueued
    /// after the marker are discarded, and any handles to their results resolve to
    /// [`AbandonedError`].
    ///
    /// Must not be called from a task running on this dispatcher.
    pub fn stop(&self) {
        let inner = &self.handle.0;
        let mut lifecycle = inner.lock_lifecycle();
        let Some(worker) = lifecycle.worker.take() else { return };
        debug_assert!(
            !worker::is_worker_of(inner.id),
            "Dispatcher::stop called from its own worker thread",
        );

        inner.enqueue(&lifecycle, Task::stop_marker());
        if worker.join().is_err() {
            error!(dispatcher = inner.id, "worker thread panicked");
        }
        inner.running.store(false, Ordering::Release);
        let abandoned = inner.queue.take_all();
        drop(lifecycle);

        if !abandoned.is_empty() {
            warn!(
                dispatcher = inner.id,
                count = abandoned.len(),
                "abandoning tasks queued behind the stop marker",
            );
        }
        drop(abandoned);
        debug!(dispatcher = inner.id, "dispatcher stopped");
    }

    /// Whether the dispatcher is running
    ///
    /// Never blocks. May be momentarily stale relative to a concurrent `start` or `stop`.
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Get a cloneable handle for submitting work to this dispatcher
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// See [`Handle::exec_async`]
    pub fn exec_async<F>(&self, f: F) -> Result<(), NotRunningError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.exec_async(f)
    }

    /// See [`Handle::exec_async_with`]
    pub fn exec_async_with<A, F>(&self, args: A, f: F) -> Result<(), NotRunningError>
    where
        A: Send + 'static,
        F: FnOnce(A) + Send + 'static,
    {
        self.handle.exec_async_with(args, f)
    }

    /// See [`Handle::exec_async_with_handle`]
    pub fn exec_async_with_handle<F, R>(&self, f: F) -> Result<ResultHandle<R>, NotRunningError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.exec_async_with_handle(f)
    }

    /// See [`Handle::exec_sync`]
    pub fn exec_sync<F, R>(&self, f: F) -> Result<R, SyncError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.exec_sync(f)
    }

    /// See [`Handle::exec_sync_with`]
    pub fn exec_sync_with<A, F, R>(&self, args: A, f: F) -> Result<R, SyncError>
    where
        A: Send + 'static,
        F: FnOnce(A) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.handle.exec_sync_with(args, f)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Debug for Dispatcher {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("id", &self.handle.0.id)
            .field("running", &self.is_running())
            .finish()
    }
}


/// Cloneable handle for submitting work to a [`Dispatcher`]
///
/// Handles can submit work but cannot start or stop the dispatcher. They are what tasks should
/// capture when they need to submit further work, since tasks must own everything they capture.
/// Submitting through a handle whose dispatcher is stopped or dropped fails with
/// [`NotRunningError`].
#[derive(Clone)]
pub struct Handle(Arc<Inner>);

impl Handle {
    /// Whether the dispatcher is running
    ///
    /// Never blocks. May be momentarily stale relative to a concurrent `start` or `stop`.
    pub fn is_running(&self) -> bool {
        self.0.is_running()
    }

    /// Enqueue a task without waiting for it to run
    ///
    /// If the task panics, the panic is logged and the worker carries on with the next task.
    pub fn exec_async<F>(&self, f: F) -> Result<(), NotRunningError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.0.submit(Task::detached(f))
    }

    /// Enqueue a task which will be called with `args`, without waiting for it to run
    pub fn exec_async_with<A, F>(&self, args: A, f: F) -> Result<(), NotRunningError>
    where
        A: Send + 'static,
        F: FnOnce(A) + Send + 'static,
    {
        self.exec_async(move || f(args))
    }

    /// Enqueue a task without waiting for it to run, returning a handle to its eventual result
    ///
    /// A panic in the task is captured and delivered through the handle as
    /// [`RecvError::TaskFailed`].
    pub fn exec_async_with_handle<F, R>(&self, f: F) -> Result<ResultHandle<R>, NotRunningError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.0.exec_async_with_handle(f)
    }

    /// Run a task on the worker and block until it has run, returning its return value
    ///
    /// When called from outside the worker thread, the task is enqueued behind everything already
    /// queued and the calling thread blocks until the worker gets to it. When called from a task
    /// already running on the worker, the task runs immediately in place, and nested calls of
    /// this kind run depth-first in the order written.
    ///
    /// If the task panics, this returns [`SyncError::TaskFailed`] carrying the original panic
    /// payload, and the dispatcher carries on running. This holds for in-place calls on the worker
    /// too: the panic does not unwind into the calling task, it comes back wrapped as a value. Use
    /// [`TaskFailure::resume`] to turn it back into a panic. Ordinary errors are best returned by
    /// the task as a `Result`, which is delivered as the return value unchanged.
    pub fn exec_sync<F, R>(&self, f: F) -> Result<R, SyncError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.0.exec_sync(f)
    }

    /// Run a task which will be called with `args` on the worker and block until it has run
    pub fn exec_sync_with<A, F, R>(&self, args: A, f: F) -> Result<R, SyncError>
    where
        A: Send + 'static,
        F: FnOnce(A) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.exec_sync(move || f(args))
    }
}

impl Debug for Handle {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.0.id)
            .field("running", &self.is_running())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{mpsc, Mutex},
        thread,
    };

    #[test]
    fn not_running_until_started() {
        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.is_running());
        assert_eq!(dispatcher.exec_async(|| ()), Err(NotRunningError));
        assert_eq!(dispatcher.exec_sync(|| 1), Err(SyncError::NotRunning(NotRunningError)));
        assert!(dispatcher.exec_async_with_handle(|| 1).is_err());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let dispatcher = Dispatcher::new();
        dispatcher.stop();
        dispatcher.start().unwrap();
        dispatcher.start().unwrap();
        assert!(dispatcher.is_running());
        assert_eq!(dispatcher.exec_sync(|| "ok"), Ok("ok"));
        dispatcher.stop();
        dispatcher.stop();
        assert!(!dispatcher.is_running());
        assert_eq!(dispatcher.exec_async(|| ()), Err(NotRunningError));
    }

    #[test]
    fn worker_thread_uses_configured_name() {
        let dispatcher = Dispatcher::builder()
            .with_thread_name("dispatch-test")
            .with_stack_size(256 * 1024)
            .start()
            .unwrap();
        let name = dispatcher
            .exec_sync(|| thread::current().name().map(str::to_owned))
            .unwrap();
        assert_eq!(name.as_deref(), Some("dispatch-test"));
    }

    #[test]
    fn reentrant_sync_runs_ahead_of_queue() {
        let dispatcher = Dispatcher::builder().start().unwrap();
        let handle = dispatcher.handle();
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_2 = Arc::clone(&log);
        dispatcher.exec_async(move || {
            log_2.lock().unwrap().push("outer");
            let log_3 = Arc::clone(&log_2);
            handle.exec_async(move || log_3.lock().unwrap().push("queued")).unwrap();
            let log_3 = Arc::clone(&log_2);
            handle.exec_sync(move || log_3.lock().unwrap().push("in place")).unwrap();
            log_2.lock().unwrap().push("outer end");
        }).unwrap();
        // queued behind the outer task, so its return means "queued" is already enqueued
        dispatcher.exec_sync(|| ()).unwrap();
        dispatcher.stop();

        assert_eq!(*log.lock().unwrap(), vec!["outer", "in place", "outer end", "queued"]);
    }

    #[test]
    fn reentrant_sync_failure_goes_to_immediate_caller() {
        let dispatcher = Dispatcher::builder().start().unwrap();
        let handle = dispatcher.handle();
        let inner_result = dispatcher.exec_sync(move || {
            handle.exec_sync(|| panic!("inner")).map_err(|e| e.to_string())
        });
        assert_eq!(inner_result, Ok(Err("task panicked: inner".to_owned())));
        assert!(dispatcher.is_running());
    }

    #[test]
    fn handle_fails_after_dispatcher_dropped() {
        let dispatcher = Dispatcher::builder().start().unwrap();
        let handle = dispatcher.handle();
        assert!(handle.is_running());
        drop(dispatcher);
        assert!(!handle.is_running());
        assert_eq!(handle.exec_async(|| ()), Err(NotRunningError));
    }

    // run `late` on the worker only once a concurrent stop has queued its marker, so anything
    // `late` enqueues lands behind the marker. returns after stop has returned.
    fn stop_then_run_on_worker<F>(dispatcher: &Dispatcher, late: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let (started_send, started_recv) = mpsc::channel::<()>();
        let (gate_send, gate_recv) = mpsc::channel::<()>();
        dispatcher.exec_async(move || {
            started_send.send(()).unwrap();
            gate_recv.recv().unwrap();
            late();
        }).unwrap();
        thread::scope(|s| {
            s.spawn(|| dispatcher.stop());
            started_recv.recv().unwrap();
            // the running task is already popped, so the first thing queued is the stop marker
            while dispatcher.handle.0.queue.len() == 0 {
                thread::yield_now();
            }
            gate_send.send(()).unwrap();
        });
    }

    #[test]
    fn stop_abandons_work_the_worker_queued_behind_the_marker() {
        let dispatcher = Dispatcher::builder().start().unwrap();
        let handle = dispatcher.handle();
        let (send, recv) = mpsc::channel();

        stop_then_run_on_worker(&dispatcher, move || {
            send.send(handle.exec_async_with_handle(|| "too late")).unwrap();
        });

        assert!(!dispatcher.is_running());
        let mut late = recv.recv().unwrap().unwrap();
        assert_eq!(late.block(), Err(AbandonedError.into()));
    }

    #[test]
    fn tasks_from_previous_run_never_execute_after_restart() {
        let dispatcher = Dispatcher::builder().start().unwrap();
        let handle = dispatcher.handle();
        let ran_late = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&ran_late);
        stop_then_run_on_worker(&dispatcher, move || {
            handle.exec_async(move || flag.store(true, Ordering::SeqCst)).unwrap();
        });

        dispatcher.start().unwrap();
        assert_eq!(dispatcher.handle.0.queue.len(), 0);
        dispatcher.exec_sync(|| ()).unwrap();
        dispatcher.stop();
        assert!(!ran_late.load(Ordering::SeqCst));
    }
}
