//! triage - a bounded, priority-aware work-execution pool
//!
//! Callers submit units of work classified by an urgency level; a pool of
//! OS worker threads executes them, always picking the most urgent queued
//! task next.
//!
//! # Quick Start
//!
//! ```no_run
//! use triage::prelude::*;
//!
//! let pool: Executor = Executor::new(5).unwrap();
//! assert_eq!(pool.max_workers(), 4);
//!
//! let handle = pool
//!     .submit_with(|| Ok::<_, std::io::Error>(6 * 7), Priority::High)
//!     .unwrap();
//! assert_eq!(handle.wait().unwrap(), 42);
//!
//! pool.drain_and_stop();
//! ```
//!
//! # Model
//!
//! - **Classification**: any `Copy` type implementing [`Classification`];
//!   lower weight means more urgent. [`Priority`] is a stock set of levels.
//! - **Ready queue**: [`ReadyQueue`] trait, [`PriorityReadyQueue`] by default.
//! - **Executor**: [`Executor`] spawns between `min_workers` and
//!   `max_workers` threads on demand, retiring idle ones after 300 ms.
//! - **Handles**: [`TaskHandle`] can be waited on, polled or cancelled.

#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod executor;
pub mod prelude;
pub mod scheduler;
pub mod telemetry;

pub use config::{Config, ConfigBuilder, IDLE_TIMEOUT};
pub use error::{Error, Result, TaskError};
pub use executor::{
    DispatchHook, Executor, ExecutorBuilder, PanicStrategy, PoolState, Task, TaskHandle, TaskId,
    TaskInfo, TaskStatus, WorkerId,
};
pub use scheduler::{
    compare_urgency, Classification, Priority, PriorityReadyQueue, ReadyQueue, URGENCY_CEILING,
};
