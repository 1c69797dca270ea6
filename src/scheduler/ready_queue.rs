use super::priority::compare_urgency;
use crate::executor::task::{Job, TaskId};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::{Duration, Instant};

/// Result of [`ReadyQueue::take_next`].
#[derive(Debug)]
pub enum Take<C> {
    Ready(Job<C>),
    TimedOut,
    /// Closed and drained; nothing more will ever come out.
    Closed,
}

/// Shared holding area for pending jobs.
///
/// Unbounded: `insert` never waits for space. Admission control, if
/// wanted, belongs in front of it.
pub trait ReadyQueue<C>: Send + Sync + 'static {
    fn insert(&self, job: Job<C>);

    /// Removes and returns the most urgent job, blocking until one is
    /// available, `timeout` elapses or the queue is closed and empty.
    fn take_next(&self, timeout: Option<Duration>) -> Take<C>;

    /// Drops a pending job without running it.
    fn remove(&self, id: TaskId) -> bool;

    /// Stops waiting for new work. Jobs already queued are still handed out.
    fn close(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Weight of the job `take_next` would return now.
    fn peek_weight(&self) -> Option<i32>;
}

struct Entry<C> {
    seq: u64,
    job: Job<C>,
}

impl<C> PartialEq for Entry<C> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<C> Eq for Entry<C> {}

impl<C> PartialOrd for Entry<C> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

// Max-heap: the most urgent weight sorts greatest, ties go to the
// earliest insertion.
impl<C> Ord for Entry<C> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        compare_urgency(self.job.weight(), other.job.weight())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner<C> {
    heap: BinaryHeap<Entry<C>>,
    next_seq: u64,
    closed: bool,
}

/// Default [`ReadyQueue`]: a binary heap behind a mutex, with a condvar for
/// blocked takers.
pub struct PriorityReadyQueue<C> {
    inner: Mutex<Inner<C>>,
    available: Condvar,
}

impl<C> PriorityReadyQueue<C> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl<C> Default for PriorityReadyQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + 'static> ReadyQueue<C> for PriorityReadyQueue<C> {
    fn insert(&self, job: Job<C>) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Entry { seq, job });
        drop(inner);
        self.available.notify_one();
    }

    fn take_next(&self, timeout: Option<Duration>) -> Take<C> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut inner = self.inner.lock();
        loop {
            if let Some(entry) = inner.heap.pop() {
                return Take::Ready(entry.job);
            }
            if inner.closed {
                return Take::Closed;
            }
            match deadline {
                Some(deadline) => {
                    if self.available.wait_until(&mut inner, deadline).timed_out() {
                        return match inner.heap.pop() {
                            Some(entry) => Take::Ready(entry.job),
                            None if inner.closed => Take::Closed,
                            None => Take::TimedOut,
                        };
                    }
                }
                None => self.available.wait(&mut inner),
            }
        }
    }

    fn remove(&self, id: TaskId) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.heap.len();
        inner.heap.retain(|entry| entry.job.id() != id);
        inner.heap.len() != before
    }

    fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    fn peek_weight(&self) -> Option<i32> {
        self.inner.lock().heap.peek().map(|entry| entry.job.weight())
    }
}

impl<C> fmt::Debug for PriorityReadyQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PriorityReadyQueue")
            .field("len", &inner.heap.len())
            .field("closed", &inner.closed)
            .finish()
    }
}
