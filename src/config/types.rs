//! Configuration type definitions.
//!
//! Defaults reproduce the fixed sizing of the engine: a parallel pool with
//! `clamp(cpu - 1, 2, 4)` core workers that may grow to `2 * cpu + 1` under
//! backlog, idle extra workers retiring after 30 seconds, and a single
//! serial worker.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::ConfigError;

/// Minimum number of core workers in the parallel pool.
pub const MIN_CORE_WORKERS: usize = 2;

/// Maximum number of core workers in the parallel pool.
pub const MAX_CORE_WORKERS: usize = 4;

/// How long an idle worker above the core count waits before exiting.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Default number of idle payload containers kept per free list.
pub const DEFAULT_PAYLOAD_POOL_CAPACITY: usize = 64;

/// Default thread name prefix for worker threads.
pub const DEFAULT_THREAD_NAME: &str = "traverse";

fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Sizing of the parallel worker pool.
///
/// [`Default`] gives the fixed engine sizing: 2 to 4 core workers and a
/// peak of `2 * cpu + 1`. Any other value is an explicit override. The
/// override only has to pass [`validate`](Self::validate), so it may sit
/// outside the 2 to 4 core range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers kept alive while idle.
    pub core_workers: usize,
    /// Upper bound on workers under backlog.
    pub max_workers: usize,
    /// Idle time after which a worker above the core count exits.
    #[serde(with = "serde_duration")]
    pub keep_alive: Duration,
}

impl PoolConfig {
    /// Default sizing derived from the number of available CPUs.
    pub fn for_cpus(cpus: usize) -> Self {
        let cpus = cpus.max(1);
        Self {
            core_workers: cpus
                .saturating_sub(1)
                .clamp(MIN_CORE_WORKERS, MAX_CORE_WORKERS),
            max_workers: cpus * 2 + 1,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    /// Fixed-size pool with exactly `workers` threads.
    ///
    /// This is an override of the default sizing and is not clamped.
    pub fn fixed(workers: usize) -> Self {
        Self {
            core_workers: workers,
            max_workers: workers,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    /// Builder: set the keep-alive duration.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Check whether this is the sizing derived from the CPU count.
    pub fn is_default_sizing(&self) -> bool {
        *self == Self::default()
    }

    /// Validate worker counts.
    ///
    /// Only rejects sizings the pool cannot run with. The 2 to 4 core range
    /// applies to [`for_cpus`](Self::for_cpus), not to overrides.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_workers == 0 {
            return Err(ConfigError::InvalidConfig(
                "parallel.core_workers must be at least 1".into(),
            ));
        }
        if self.max_workers < self.core_workers {
            return Err(ConfigError::InvalidConfig(format!(
                "parallel.max_workers ({}) is smaller than parallel.core_workers ({})",
                self.max_workers, self.core_workers
            )));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_cpus(cpu_count())
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parallel pool sizing. The serial pool always has one worker.
    pub parallel: PoolConfig,
    /// Idle containers kept per payload free list.
    pub payload_pool_capacity: usize,
    /// Prefix for worker thread names.
    pub thread_name: String,
}

impl EngineConfig {
    /// Builder: set the parallel pool sizing.
    pub fn with_parallel(mut self, parallel: PoolConfig) -> Self {
        self.parallel = parallel;
        self
    }

    /// Builder: set the payload free list capacity.
    pub fn with_payload_pool_capacity(mut self, capacity: usize) -> Self {
        self.payload_pool_capacity = capacity;
        self
    }

    /// Builder: set the worker thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Validate the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.parallel.validate()?;
        if self.payload_pool_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "payload_pool_capacity must be at least 1".into(),
            ));
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "thread_name must not be empty".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel: PoolConfig::default(),
            payload_pool_capacity: DEFAULT_PAYLOAD_POOL_CAPACITY,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

/// Serde helper for Duration serialization.
///
/// Serializes Duration as whole seconds.
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
