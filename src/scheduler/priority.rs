use std::cmp::Ordering;
use std::fmt::Debug;

/// Initial value of the pool's most-urgent-seen tracker. Any submitted
/// weight at or below it tightens the tracker.
pub const URGENCY_CEILING: i32 = 100;

/// An urgency level supplied by the caller.
///
/// Weights are only ever compared through [`compare_urgency`]: a lower
/// weight is more urgent. `Default` is the baseline level used when a task
/// is submitted without a classification.
pub trait Classification: Copy + Default + Debug + Send + Sync + 'static {
    fn weight(&self) -> i32;
}

/// Compares two urgency weights.
///
/// Returns `Greater` when `a` is more urgent than `b`, `Less` when it is
/// less urgent and `Equal` on ties. Antisymmetric in its operands.
#[inline]
pub fn compare_urgency(a: i32, b: i32) -> Ordering {
    b.cmp(&a)
}

/// Returns true if `a` is strictly more urgent than `b`.
#[inline]
pub fn more_urgent(a: i32, b: i32) -> bool {
    compare_urgency(a, b) == Ordering::Greater
}

/// Stock urgency levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    Realtime = 0,
    High = 1,
    #[default]
    Normal = 2,
    Low = 3,
    Background = 4,
}

impl Priority {
    /// Every level, most urgent first.
    pub const ALL: [Priority; 5] = [
        Priority::Realtime,
        Priority::High,
        Priority::Normal,
        Priority::Low,
        Priority::Background,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Realtime => "realtime",
            Priority::High => "high",
            Priority::Normal => "normal",
            Priority::Low => "low",
            Priority::Background => "background",
        }
    }
}

impl Classification for Priority {
    fn weight(&self) -> i32 {
        *self as i32
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
