// worker thread loop
use super::pool::Shared;
use super::task::Job;
use crate::scheduler::priority::Classification;
use crate::scheduler::ready_queue::{ReadyQueue, Take};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

pub type WorkerId = usize;

pub(crate) struct Worker<C, Q> {
    id: WorkerId,
    shared: Arc<Shared<C, Q>>,
}

impl<C, Q> Worker<C, Q>
where
    C: Classification,
    Q: ReadyQueue<C>,
{
    pub(crate) fn new(id: WorkerId, shared: Arc<Shared<C, Q>>) -> Self {
        Self { id, shared }
    }

    // main loop
    pub(crate) fn run(self) {
        let idle_timeout = self.shared.config.idle_timeout();
        debug!(worker = self.id, "worker started");

        loop {
            match self.shared.queue.take_next(Some(idle_timeout)) {
                Take::Ready(job) => {
                    self.dispatch(job);
                    self.shared.task_done();
                }
                Take::TimedOut => {
                    if self.shared.try_retire_idle(self.id) {
                        return;
                    }
                }
                Take::Closed => {
                    self.shared.retire(self.id);
                    return;
                }
            }
        }
    }

    fn dispatch(&self, job: Job<C>) {
        if !job.try_start() {
            trace!(worker = self.id, task = %job.id(), "skipping cancelled task");
            return;
        }

        let info = job.info();
        self.shared.metrics.record_dispatch(info.queued_for);

        let hook = AssertUnwindSafe(|| self.shared.hook.before_dispatch(self.id, &info));
        if catch_unwind(hook).is_err() {
            warn!(worker = self.id, task = %info.id, "dispatch hook panicked");
        }

        trace!(worker = self.id, task = %info.id, weight = info.weight, "running task");
        let start = Instant::now();
        let status = job.run(&self.shared.panics);
        self.shared.metrics.record_finished(status, start.elapsed());
    }
}
