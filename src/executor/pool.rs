use super::hooks::{DispatchHook, NoopHook};
use super::panic_handler::{PanicHandler, PanicStrategy};
use super::task::{Task, TaskHandle, TaskId};
use super::worker::{Worker, WorkerId};
use crate::config::{Config, ConfigBuilder};
use crate::error::{Error, Result};
use crate::scheduler::priority::{Classification, Priority, URGENCY_CEILING};
use crate::scheduler::ready_queue::{PriorityReadyQueue, ReadyQueue};
use crate::telemetry::{Metrics, MetricsSnapshot};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lifecycle of an [`Executor`]. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PoolState {
    Accepting = 0,
    Draining = 1,
    Terminated = 2,
}

impl PoolState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PoolState::Accepting,
            1 => PoolState::Draining,
            _ => PoolState::Terminated,
        }
    }
}

#[derive(Default)]
pub(crate) struct WorkerSet {
    pub(crate) live: usize,
    threads: Vec<JoinHandle<()>>,
}

/// State shared between the executor handle and its workers.
pub(crate) struct Shared<C, Q> {
    pub(crate) queue: Q,
    pub(crate) config: Config,
    pub(crate) hook: Box<dyn DispatchHook<C>>,
    pub(crate) panics: PanicHandler,
    pub(crate) metrics: Metrics,
    state: AtomicU8,
    most_urgent: AtomicI32,
    // accepted tasks that have not yet left the pool: queued or running
    outstanding: AtomicUsize,
    workers: Mutex<WorkerSet>,
    terminated: Condvar,
    next_worker_id: AtomicUsize,
}

impl<C, Q> Shared<C, Q>
where
    C: Classification,
    Q: ReadyQueue<C>,
{
    pub(crate) fn state(&self) -> PoolState {
        PoolState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// A queued task left the pool, either run by a worker or pulled back
    /// out of the queue by a cancel.
    pub(crate) fn task_done(&self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    /// Called by an idle worker whose wait timed out. Retires it if the
    /// pool is above its minimum and nothing is queued; the queue check
    /// happens under the worker-set lock so a racing submit either sees
    /// the retirement or is seen by it.
    pub(crate) fn try_retire_idle(&self, id: WorkerId) -> bool {
        let mut workers = self.workers.lock();
        if workers.live <= self.config.min_workers() || !self.queue.is_empty() {
            return false;
        }
        debug!(worker = id, live = workers.live - 1, "idle worker retiring");
        self.retire_locked(&mut workers);
        true
    }

    /// Called by a worker that found the queue closed and empty.
    pub(crate) fn retire(&self, id: WorkerId) {
        let mut workers = self.workers.lock();
        debug!(worker = id, live = workers.live - 1, "worker exiting after drain");
        self.retire_locked(&mut workers);
    }

    fn retire_locked(&self, workers: &mut MutexGuard<'_, WorkerSet>) {
        workers.live -= 1;
        if workers.live == 0 && self.state() == PoolState::Draining {
            self.terminate_locked();
        }
    }

    fn terminate_locked(&self) {
        self.state
            .store(PoolState::Terminated as u8, Ordering::Release);
        self.terminated.notify_all();
        debug!("executor terminated");
    }

    fn spawn_worker(self: &Arc<Self>, workers: &mut MutexGuard<'_, WorkerSet>) -> Result<()> {
        let id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.config.thread_name_prefix, id);

        let mut builder = thread::Builder::new().name(name);
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let worker = Worker::new(id, self.clone());
        let handle = builder.spawn(move || worker.run())?;

        workers.live += 1;
        workers.threads.retain(|t| !t.is_finished());
        workers.threads.push(handle);
        debug!(worker = id, live = workers.live, "spawned worker");
        Ok(())
    }

    fn tighten_most_urgent(&self, weight: i32) {
        // Lower weight is more urgent, so tightening is a running minimum.
        self.most_urgent.fetch_min(weight, Ordering::AcqRel);
    }
}

/// A bounded, priority-aware pool of worker threads.
///
/// Work is submitted as [`Task`]s (or bare closures) classified by `C`; the
/// most urgent queued task is always the next one a free worker picks up.
/// Worker count floats between [`min_workers`](Self::min_workers) and
/// [`max_workers`](Self::max_workers): workers are spawned on demand and
/// those above the minimum retire after sitting idle for the configured
/// idle timeout.
pub struct Executor<C = Priority, Q = PriorityReadyQueue<C>>
where
    C: Classification,
    Q: ReadyQueue<C>,
{
    shared: Arc<Shared<C, Q>>,
}

impl<C: Classification> Executor<C, PriorityReadyQueue<C>> {
    /// Creates a pool sized for `hardware_parallelism` cores.
    pub fn new(hardware_parallelism: usize) -> Result<Self> {
        Self::builder()
            .hardware_parallelism(hardware_parallelism)
            .build()
    }

    /// Creates a pool sized for the detected number of cores.
    pub fn detect() -> Result<Self> {
        Self::builder().build()
    }

    pub fn with_config(config: Config) -> Result<Self> {
        ExecutorBuilder::new().build_with_config(config)
    }

    pub fn builder() -> ExecutorBuilder<C> {
        ExecutorBuilder::new()
    }
}

impl<C, Q> Executor<C, Q>
where
    C: Classification,
    Q: ReadyQueue<C>,
{
    fn from_parts(
        config: Config,
        queue: Q,
        hook: Box<dyn DispatchHook<C>>,
        panic_strategy: PanicStrategy,
    ) -> Result<Self> {
        config.validate()?;
        debug!(
            min_workers = config.min_workers(),
            max_workers = config.max_workers(),
            "executor created"
        );
        let shared = Arc::new(Shared {
            queue,
            config,
            hook,
            panics: PanicHandler::new(panic_strategy),
            metrics: Metrics::new(),
            state: AtomicU8::new(PoolState::Accepting as u8),
            most_urgent: AtomicI32::new(URGENCY_CEILING),
            outstanding: AtomicUsize::new(0),
            workers: Mutex::new(WorkerSet::default()),
            terminated: Condvar::new(),
            next_worker_id: AtomicUsize::new(0),
        });
        Ok(Self { shared })
    }

    /// Submits a task and returns its handle. Never waits for the task to
    /// run.
    pub fn submit_task<T, E>(&self, task: Task<T, E, C>) -> Result<TaskHandle<T, E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let shared = &self.shared;
        let mut workers = shared.workers.lock();
        if shared.state() != PoolState::Accepting {
            drop(workers);
            shared.metrics.record_rejected();
            return Err(Error::Rejected);
        }

        // Grow before touching the queue, so a failed spawn on an empty
        // pool leaves no trace.
        let outstanding = shared.outstanding.load(Ordering::Acquire) + 1;
        if workers.live < shared.config.max_workers() && outstanding > workers.live {
            if let Err(e) = shared.spawn_worker(&mut workers) {
                if workers.live == 0 {
                    return Err(e);
                }
                warn!(error = %e, live = workers.live, "could not grow worker pool");
            }
        }

        let (job, handle) = task.into_parts();
        shared.tighten_most_urgent(job.weight());
        handle.bind_unqueue(unqueue_for(Arc::downgrade(shared)));
        tracing::trace!(task = %job.id(), weight = job.weight(), "task queued");
        shared.outstanding.fetch_add(1, Ordering::AcqRel);
        shared.queue.insert(job);
        shared.metrics.record_submitted();

        Ok(handle)
    }

    /// Like [`submit_task`](Self::submit_task), but an absent task is an
    /// invalid argument. The pool is not touched in that case.
    pub fn try_submit<T, E>(&self, task: Option<Task<T, E, C>>) -> Result<TaskHandle<T, E>>
    where
        T: Send + 'static,
        E: Send + 'static,
    {
        let task = task.ok_or_else(|| Error::invalid_argument("task is missing"))?;
        self.submit_task(task)
    }

    /// Submits `op` with the baseline classification.
    pub fn submit<T, E, F>(&self, op: F) -> Result<TaskHandle<T, E>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit_task(Task::new(op))
    }

    pub fn submit_with<T, E, F>(&self, op: F, classification: C) -> Result<TaskHandle<T, E>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.submit_task(Task::with_classification(op, classification))
    }

    /// Submits an infallible closure with the baseline classification.
    pub fn execute<T, F>(&self, f: F) -> Result<TaskHandle<T, Infallible>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit(move || Ok(f()))
    }

    /// Stops accepting work. Queued and running tasks still complete; the
    /// pool becomes [`PoolState::Terminated`] once the last worker exits.
    /// Does not block.
    pub fn drain_and_stop(&self) {
        let shared = &self.shared;
        let mut workers = shared.workers.lock();
        if shared
            .state
            .compare_exchange(
                PoolState::Accepting as u8,
                PoolState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        debug!(queued = shared.queue.len(), live = workers.live, "executor draining");
        shared.queue.close();

        // Workers only retire on an empty queue and a job is never queued
        // without a live worker, so an empty pool has nothing left to run.
        if workers.live == 0 {
            debug_assert!(shared.queue.is_empty());
            shared.terminate_locked();
        }
    }

    /// Blocks until the pool is terminated or `timeout` elapses. Returns
    /// whether it terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut workers = self.shared.workers.lock();
        while self.shared.state() != PoolState::Terminated {
            if self
                .shared
                .terminated
                .wait_until(&mut workers, deadline)
                .timed_out()
            {
                return self.shared.state() == PoolState::Terminated;
            }
        }
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.state() == PoolState::Terminated
    }

    pub fn state(&self) -> PoolState {
        self.shared.state()
    }

    /// The most urgent weight submitted so far, or [`URGENCY_CEILING`] if
    /// nothing below it has been submitted.
    pub fn current_most_urgent(&self) -> i32 {
        self.shared.most_urgent.load(Ordering::Acquire)
    }

    pub fn max_workers(&self) -> usize {
        self.shared.config.max_workers()
    }

    pub fn min_workers(&self) -> usize {
        self.shared.config.min_workers()
    }

    pub fn live_workers(&self) -> usize {
        self.shared.workers.lock().live
    }

    /// Accepted tasks that are queued or running.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Number of tasks waiting in the ready queue.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let mut snapshot = self.shared.metrics.snapshot();
        snapshot.tasks_panicked = self.shared.panics.panic_count() as u64;
        snapshot
    }
}

fn unqueue_for<C, Q>(shared: Weak<Shared<C, Q>>) -> Box<dyn Fn(TaskId) -> bool + Send + Sync>
where
    C: Classification,
    Q: ReadyQueue<C>,
{
    Box::new(move |id| match shared.upgrade() {
        Some(shared) => {
            shared.metrics.record_cancelled();
            let removed = shared.queue.remove(id);
            if removed {
                shared.task_done();
            }
            removed
        }
        None => false,
    })
}

impl<C, Q> Drop for Executor<C, Q>
where
    C: Classification,
    Q: ReadyQueue<C>,
{
    fn drop(&mut self) {
        self.drain_and_stop();

        let threads = std::mem::take(&mut self.shared.workers.lock().threads);
        let current = thread::current().id();
        for handle in threads {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl<C, Q> fmt::Debug for Executor<C, Q>
where
    C: Classification,
    Q: ReadyQueue<C>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let workers = self.shared.workers.lock();
        f.debug_struct("Executor")
            .field("state", &self.state())
            .field("min_workers", &self.min_workers())
            .field("max_workers", &self.max_workers())
            .field("live_workers", &workers.live)
            .field("outstanding", &self.outstanding())
            .field("queued", &self.shared.queue.len())
            .field("most_urgent", &self.current_most_urgent())
            .finish()
    }
}

/// Builder for [`Executor`]. Worker bounds are always derived from the
/// hardware parallelism; the remaining knobs are ambient.
pub struct ExecutorBuilder<C, Q = PriorityReadyQueue<C>> {
    config: ConfigBuilder,
    queue: Q,
    hook: Box<dyn DispatchHook<C>>,
    panic_strategy: PanicStrategy,
}

impl<C: Classification> ExecutorBuilder<C> {
    pub fn new() -> Self {
        Self {
            config: ConfigBuilder::new(),
            queue: PriorityReadyQueue::new(),
            hook: Box::new(NoopHook),
            panic_strategy: PanicStrategy::default(),
        }
    }
}

impl<C: Classification> Default for ExecutorBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, Q> ExecutorBuilder<C, Q>
where
    C: Classification,
    Q: ReadyQueue<C>,
{
    pub fn hardware_parallelism(mut self, parallelism: usize) -> Self {
        self.config = self.config.hardware_parallelism(parallelism);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config = self.config.thread_name_prefix(prefix);
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config = self.config.stack_size(size);
        self
    }

    /// Installs a hook run by each worker right before it executes a task.
    pub fn before_dispatch<H: DispatchHook<C>>(mut self, hook: H) -> Self {
        self.hook = Box::new(hook);
        self
    }

    pub fn panic_strategy(mut self, strategy: PanicStrategy) -> Self {
        self.panic_strategy = strategy;
        self
    }

    /// Replaces the ready queue implementation.
    pub fn queue<Q2: ReadyQueue<C>>(self, queue: Q2) -> ExecutorBuilder<C, Q2> {
        ExecutorBuilder {
            config: self.config,
            queue,
            hook: self.hook,
            panic_strategy: self.panic_strategy,
        }
    }

    pub fn build(self) -> Result<Executor<C, Q>> {
        let config = self.config.build()?;
        Executor::from_parts(config, self.queue, self.hook, self.panic_strategy)
    }

    fn build_with_config(self, config: Config) -> Result<Executor<C, Q>> {
        Executor::from_parts(config, self.queue, self.hook, self.panic_strategy)
    }
}

impl<C, Q> fmt::Debug for ExecutorBuilder<C, Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorBuilder")
            .field("config", &self.config)
            .field("panic_strategy", &self.panic_strategy)
            .finish_non_exhaustive()
    }
}
