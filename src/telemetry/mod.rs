//! Pool telemetry.
//!
//! Counters and latency histograms are always collected; read them through
//! [`Executor::metrics`](crate::Executor::metrics).

pub mod metrics;

pub use metrics::{Metrics, MetricsSnapshot};
