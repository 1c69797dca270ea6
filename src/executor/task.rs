//! Work items and their result handles.
//!
//! A [`Task`] pairs an operation with an urgency classification. Submitting
//! it splits it into a type-erased [`Job`] that lives in the ready queue and
//! a typed [`TaskHandle`] the caller keeps. Both sides share one completion
//! slot and one status word.

use super::panic_handler::PanicHandler;
use crate::error::{Error, Result, TaskError};
use crate::scheduler::priority::Classification;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a submitted task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskStatus {
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl TaskStatus {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => TaskStatus::Pending,
            1 => TaskStatus::Running,
            2 => TaskStatus::Completed,
            3 => TaskStatus::Failed,
            _ => TaskStatus::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Status word shared by a job and its handle. Leaving `Pending` is a
/// single CAS, which is what rules out double dispatch and running a
/// cancelled task.
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    fn new() -> Self {
        Self(AtomicU8::new(TaskStatus::Pending as u8))
    }

    pub(crate) fn load(&self) -> TaskStatus {
        TaskStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn transition(&self, from: TaskStatus, to: TaskStatus) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn try_start(&self) -> bool {
        self.transition(TaskStatus::Pending, TaskStatus::Running)
    }

    fn try_cancel(&self) -> bool {
        self.transition(TaskStatus::Pending, TaskStatus::Cancelled)
    }

    fn finish(&self, status: TaskStatus) {
        self.0.store(status as u8, Ordering::Release);
    }
}

type Outcome<T, E> = std::result::Result<T, TaskError<E>>;
type Operation<T, E> = Box<dyn FnOnce() -> std::result::Result<T, E> + Send + 'static>;
type Unqueue = Box<dyn Fn(TaskId) -> bool + Send + Sync + 'static>;

struct Completion<T, E> {
    status: Arc<StatusCell>,
    slot: Mutex<Option<Outcome<T, E>>>,
    ready: Condvar,
    unqueue: OnceLock<Unqueue>,
}

impl<T, E> Completion<T, E> {
    fn new() -> Self {
        Self {
            status: Arc::new(StatusCell::new()),
            slot: Mutex::new(None),
            ready: Condvar::new(),
            unqueue: OnceLock::new(),
        }
    }

    fn post(&self, outcome: Outcome<T, E>, status: TaskStatus) {
        let mut slot = self.slot.lock();
        *slot = Some(outcome);
        self.status.finish(status);
        self.ready.notify_all();
    }
}

/// A unit of work plus its urgency classification.
pub struct Task<T, E, C> {
    id: TaskId,
    classification: C,
    op: Operation<T, E>,
}

impl<T, E, C> Task<T, E, C>
where
    T: Send + 'static,
    E: Send + 'static,
    C: Classification,
{
    /// Creates a task with the baseline classification.
    pub fn new<F>(op: F) -> Self
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    {
        Self::with_classification(op, C::default())
    }

    pub fn with_classification<F>(op: F, classification: C) -> Self
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    {
        Self {
            id: TaskId::next(),
            classification,
            op: Box::new(op),
        }
    }

    /// Builds a task from optional parts. A missing operation is an
    /// invalid argument; a missing classification falls back to the
    /// baseline level.
    pub fn from_parts<F>(op: Option<F>, classification: Option<C>) -> Result<Self>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    {
        let op = op.ok_or_else(|| Error::invalid_argument("task operation is missing"))?;
        Ok(Self::with_classification(
            op,
            classification.unwrap_or_default(),
        ))
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn classification(&self) -> C {
        self.classification
    }

    /// Splits the task into the queued job and the caller's handle.
    pub(crate) fn into_parts(self) -> (Job<C>, TaskHandle<T, E>) {
        let completion = Arc::new(Completion::new());
        let status = completion.status.clone();
        let weight = self.classification.weight();
        let op = self.op;

        let posted = completion.clone();
        let run = Box::new(move |panics: &PanicHandler| {
            let (outcome, status) = match panics.execute(op) {
                Ok(Ok(value)) => (Ok(value), TaskStatus::Completed),
                Ok(Err(err)) => (Err(TaskError::Failed(err)), TaskStatus::Failed),
                Err(info) => (Err(TaskError::Panicked(info)), TaskStatus::Failed),
            };
            posted.post(outcome, status);
            status
        });

        let job = Job {
            id: self.id,
            classification: self.classification,
            weight,
            enqueued_at: Instant::now(),
            status,
            run,
        };
        let handle = TaskHandle {
            id: self.id,
            weight,
            completion,
        };
        (job, handle)
    }
}

impl<T, E, C: fmt::Debug> fmt::Debug for Task<T, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("classification", &self.classification)
            .finish_non_exhaustive()
    }
}

/// What a dispatch hook gets to see about the task it is about to run.
#[derive(Debug, Clone, Copy)]
pub struct TaskInfo<C> {
    pub id: TaskId,
    pub classification: C,
    pub weight: i32,
    pub queued_for: Duration,
}

/// Type-erased queued form of a [`Task`].
pub struct Job<C> {
    id: TaskId,
    classification: C,
    weight: i32,
    enqueued_at: Instant,
    status: Arc<StatusCell>,
    run: Box<dyn FnOnce(&PanicHandler) -> TaskStatus + Send + 'static>,
}

impl<C> Job<C> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn status(&self) -> TaskStatus {
        self.status.load()
    }

    /// Claims the job for execution. Fails if it was cancelled or already
    /// claimed.
    pub(crate) fn try_start(&self) -> bool {
        self.status.try_start()
    }

    /// Runs a claimed job and posts its outcome.
    pub(crate) fn run(self, panics: &PanicHandler) -> TaskStatus {
        debug_assert_eq!(self.status.load(), TaskStatus::Running);
        (self.run)(panics)
    }
}

impl<C: Copy> Job<C> {
    pub fn classification(&self) -> C {
        self.classification
    }

    pub fn info(&self) -> TaskInfo<C> {
        TaskInfo {
            id: self.id,
            classification: self.classification,
            weight: self.weight,
            queued_for: self.enqueued_at.elapsed(),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for Job<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("classification", &self.classification)
            .field("weight", &self.weight)
            .field("status", &self.status.load())
            .finish()
    }
}

/// Caller-side handle to a submitted task's outcome.
pub struct TaskHandle<T, E> {
    id: TaskId,
    weight: i32,
    completion: Arc<Completion<T, E>>,
}

impl<T, E> TaskHandle<T, E> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn status(&self) -> TaskStatus {
        self.completion.status.load()
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Blocks the calling thread until the task is terminal.
    pub fn wait(self) -> Outcome<T, E> {
        let mut slot = self.completion.slot.lock();
        loop {
            if let Some(outcome) = slot.take() {
                return outcome;
            }
            self.completion.ready.wait(&mut slot);
        }
    }

    /// Like [`wait`](Self::wait) but gives the handle back if the task is
    /// still not terminal after `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Outcome<T, E>, Self> {
        let deadline = Instant::now() + timeout;
        let taken = {
            let mut slot = self.completion.slot.lock();
            loop {
                if let Some(outcome) = slot.take() {
                    break Some(outcome);
                }
                if self
                    .completion
                    .ready
                    .wait_until(&mut slot, deadline)
                    .timed_out()
                {
                    break slot.take();
                }
            }
        };
        taken.ok_or(self)
    }

    /// Cancels the task if it has not started yet.
    ///
    /// Returns `false` (and does nothing) once the task is running or
    /// terminal: completion always wins over a racing cancel.
    pub fn cancel(&self) -> bool {
        if !self.completion.status.try_cancel() {
            return false;
        }
        if let Some(unqueue) = self.completion.unqueue.get() {
            unqueue(self.id);
        }
        self.completion
            .post(Err(TaskError::Cancelled), TaskStatus::Cancelled);
        true
    }

    /// Lets `cancel` pull the job back out of the queue it was inserted into.
    pub(crate) fn bind_unqueue(&self, unqueue: Unqueue) {
        let _ = self.completion.unqueue.set(unqueue);
    }
}

impl<T, E> fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id)
            .field("weight", &self.weight)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::panic_handler::PanicStrategy;
    use crate::scheduler::priority::Priority;
    use std::thread;

    type TestTask<T> = Task<T, String, Priority>;

    fn quiet() -> PanicHandler {
        PanicHandler::new(PanicStrategy::Isolate)
    }

    #[test]
    fn test_default_classification() {
        let task: TestTask<u32> = Task::new(|| Ok(1));
        assert_eq!(task.classification(), Priority::Normal);

        let task: TestTask<u32> = Task::with_classification(|| Ok(1), Priority::High);
        assert_eq!(task.classification(), Priority::High);
    }

    #[test]
    fn test_ids_are_unique() {
        let a: TestTask<()> = Task::new(|| Ok(()));
        let b: TestTask<()> = Task::new(|| Ok(()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_from_parts_missing_operation() {
        let missing = None::<fn() -> std::result::Result<u32, String>>;
        let result = TestTask::<u32>::from_parts(missing, None);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_from_parts_defaults_classification() {
        let task = TestTask::<u32>::from_parts(Some(|| Ok(5)), None).unwrap();
        assert_eq!(task.classification(), Priority::default());
    }

    #[test]
    fn test_run_posts_value() {
        let task: TestTask<u32> = Task::new(|| Ok(41 + 1));
        let (job, handle) = task.into_parts();
        assert_eq!(handle.status(), TaskStatus::Pending);

        assert!(job.try_start());
        assert_eq!(handle.status(), TaskStatus::Running);
        assert_eq!(job.run(&quiet()), TaskStatus::Completed);

        assert!(handle.is_finished());
        assert_eq!(handle.wait().unwrap(), 42);
    }

    #[test]
    fn test_run_posts_exact_error() {
        let task: TestTask<u32> = Task::new(|| Err("disk on fire".to_string()));
        let (job, handle) = task.into_parts();

        assert!(job.try_start());
        assert_eq!(job.run(&quiet()), TaskStatus::Failed);

        let err = handle.wait().unwrap_err();
        assert_eq!(err.into_failure().as_deref(), Some("disk on fire"));
    }

    #[test]
    fn test_run_captures_panic() {
        let task: TestTask<u32> = Task::new(|| panic!("boom"));
        let (job, handle) = task.into_parts();
        let panics = quiet();

        assert!(job.try_start());
        assert_eq!(job.run(&panics), TaskStatus::Failed);
        assert_eq!(panics.panic_count(), 1);

        match handle.wait() {
            Err(TaskError::Panicked(info)) => assert_eq!(info.message, "boom"),
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_cancel_pending() {
        let task: TestTask<u32> = Task::new(|| Ok(1));
        let (job, handle) = task.into_parts();

        assert!(handle.cancel());
        assert_eq!(handle.status(), TaskStatus::Cancelled);
        assert!(!job.try_start());
        assert!(!handle.cancel());
        assert!(handle.wait().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_cancel_running_is_noop() {
        let task: TestTask<u32> = Task::new(|| Ok(9));
        let (job, handle) = task.into_parts();

        assert!(job.try_start());
        assert!(!handle.cancel());
        assert_eq!(handle.status(), TaskStatus::Running);

        job.run(&quiet());
        assert!(!handle.cancel());
        assert_eq!(handle.wait().unwrap(), 9);
    }

    #[test]
    fn test_cancel_invokes_unqueue() {
        use std::sync::atomic::AtomicBool;

        let task: TestTask<u32> = Task::new(|| Ok(1));
        let id = task.id();
        let (_job, handle) = task.into_parts();

        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        handle.bind_unqueue(Box::new(move |unqueued| {
            assert_eq!(unqueued, id);
            flag.store(true, Ordering::SeqCst);
            true
        }));

        assert!(handle.cancel());
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_wait_timeout_returns_handle() {
        let task: TestTask<u32> = Task::new(|| Ok(3));
        let (job, handle) = task.into_parts();

        let handle = handle
            .wait_timeout(Duration::from_millis(20))
            .expect_err("nothing ran yet");

        assert!(job.try_start());
        job.run(&quiet());

        let outcome = handle.wait_timeout(Duration::from_millis(20)).unwrap();
        assert_eq!(outcome.unwrap(), 3);
    }

    #[test]
    fn test_wait_blocks_until_posted() {
        let task: TestTask<&'static str> = Task::new(|| Ok("late"));
        let (job, handle) = task.into_parts();

        let runner = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            assert!(job.try_start());
            job.run(&PanicHandler::new(PanicStrategy::Isolate));
        });

        assert_eq!(handle.wait().unwrap(), "late");
        runner.join().unwrap();
    }

    #[test]
    fn test_job_info() {
        let task: TestTask<()> = Task::with_classification(|| Ok(()), Priority::Low);
        let id = task.id();
        let (job, _handle) = task.into_parts();

        let info = job.info();
        assert_eq!(info.id, id);
        assert_eq!(info.classification, Priority::Low);
        assert_eq!(info.weight, Priority::Low.weight());
    }
}
