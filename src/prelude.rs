pub use crate::config::{Config, ConfigBuilder};
pub use crate::error::{Error, Result, TaskError};
pub use crate::executor::{
    DispatchHook, Executor, PoolState, Task, TaskHandle, TaskInfo, TaskStatus, WorkerId,
};
pub use crate::scheduler::{Classification, Priority};
pub use crate::telemetry::MetricsSnapshot;
