//! Urgency classification and the ready queue.
//!
//! Everything that decides *which* task runs next lives here; the executor
//! only decides *when*.

pub mod priority;
pub mod ready_queue;

pub use priority::{compare_urgency, more_urgent, Classification, Priority, URGENCY_CEILING};
pub use ready_queue::{PriorityReadyQueue, ReadyQueue, Take};
