use crate::error::{Error, Result};
use std::time::Duration;

/// How long a worker above the minimum may sit idle before it retires.
pub const IDLE_TIMEOUT: Duration = Duration::from_millis(300);

/// Pool configuration. Worker bounds are derived from the hardware
/// parallelism once, at construction, and never change afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    hardware_parallelism: usize,
    min_workers: usize,
    max_workers: usize,
    idle_timeout: Duration,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Derives worker bounds from `parallelism`.
    ///
    /// `max_workers = max(P - 1, 1)`, `min_workers = max((P - 1) / 2 - 1, 0)`.
    pub fn from_parallelism(parallelism: usize) -> Result<Self> {
        ConfigBuilder::new()
            .hardware_parallelism(parallelism)
            .build()
    }

    /// Same as [`Config::from_parallelism`] with the detected CPU count.
    pub fn detect() -> Result<Self> {
        Self::from_parallelism(num_cpus::get())
    }

    pub fn validate(&self) -> Result<()> {
        if self.hardware_parallelism == 0 {
            return Err(Error::config("hardware parallelism must be >= 1"));
        }
        if self.max_workers < 1 {
            return Err(Error::config("derived max_workers must be >= 1"));
        }
        if self.min_workers > self.max_workers {
            return Err(Error::config("min_workers exceeds max_workers"));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }
        if let Some(0) = self.stack_size {
            return Err(Error::config("stack_size must be > 0"));
        }
        Ok(())
    }

    pub fn hardware_parallelism(&self) -> usize {
        self.hardware_parallelism
    }

    pub fn min_workers(&self) -> usize {
        self.min_workers
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }
}

fn derive_bounds(parallelism: usize) -> (usize, usize) {
    let spare = parallelism.saturating_sub(1);
    let max = spare.max(1);
    let min = (spare / 2).saturating_sub(1);
    (min, max)
}

#[derive(Debug)]
pub struct ConfigBuilder {
    hardware_parallelism: usize,
    stack_size: Option<usize>,
    thread_name_prefix: String,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            hardware_parallelism: num_cpus::get(),
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "triage-worker".to_string(),
        }
    }

    pub fn hardware_parallelism(mut self, parallelism: usize) -> Self {
        self.hardware_parallelism = parallelism;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Result<Config> {
        let (min_workers, max_workers) = derive_bounds(self.hardware_parallelism);
        let config = Config {
            hardware_parallelism: self.hardware_parallelism,
            min_workers,
            max_workers,
            idle_timeout: IDLE_TIMEOUT,
            stack_size: self.stack_size,
            thread_name_prefix: self.thread_name_prefix,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_for_five_cores() {
        let config = Config::from_parallelism(5).unwrap();
        assert_eq!(config.max_workers(), 4);
        assert_eq!(config.min_workers(), 1);
        assert_eq!(config.idle_timeout(), Duration::from_millis(300));
    }

    #[test]
    fn test_bounds_small_machines() {
        let one = Config::from_parallelism(1).unwrap();
        assert_eq!((one.min_workers(), one.max_workers()), (0, 1));

        let two = Config::from_parallelism(2).unwrap();
        assert_eq!((two.min_workers(), two.max_workers()), (0, 1));

        let three = Config::from_parallelism(3).unwrap();
        assert_eq!((three.min_workers(), three.max_workers()), (0, 2));
    }

    #[test]
    fn test_bounds_large_machine() {
        let config = Config::from_parallelism(16).unwrap();
        assert_eq!(config.max_workers(), 15);
        assert_eq!(config.min_workers(), 6);
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        assert!(matches!(
            Config::from_parallelism(0),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_builder_validation() {
        assert!(Config::builder()
            .hardware_parallelism(4)
            .thread_name_prefix("")
            .build()
            .is_err());

        let config = Config::builder()
            .hardware_parallelism(4)
            .thread_name_prefix("io")
            .stack_size(64 * 1024)
            .build()
            .unwrap();
        assert_eq!(config.thread_name_prefix, "io");
        assert_eq!(config.stack_size, Some(64 * 1024));
    }
}
