use super::task::TaskInfo;
use super::worker::WorkerId;

/// Called by a worker right before it runs a task.
///
/// The pool does nothing with the call itself; it exists so that
/// instrumentation can observe dispatches without touching the worker loop.
pub trait DispatchHook<C>: Send + Sync + 'static {
    fn before_dispatch(&self, worker: WorkerId, task: &TaskInfo<C>);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl<C> DispatchHook<C> for NoopHook {
    #[inline]
    fn before_dispatch(&self, _worker: WorkerId, _task: &TaskInfo<C>) {}
}

impl<C, F> DispatchHook<C> for F
where
    F: Fn(WorkerId, &TaskInfo<C>) + Send + Sync + 'static,
{
    fn before_dispatch(&self, worker: WorkerId, task: &TaskInfo<C>) {
        self(worker, task)
    }
}
