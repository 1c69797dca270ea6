//! Task execution infrastructure.
//!
//! This module provides the work item and result handle types, the worker
//! loop and the [`Executor`] pool that ties them to a ready queue.

pub mod hooks;
pub mod panic_handler;
pub mod pool;
pub mod task;
pub mod worker;

pub use hooks::{DispatchHook, NoopHook};
pub use panic_handler::{PanicHandler, PanicInfo, PanicStrategy};
pub use pool::{Executor, ExecutorBuilder, PoolState};
pub use task::{Job, Task, TaskHandle, TaskId, TaskInfo, TaskStatus};
pub use worker::WorkerId;
