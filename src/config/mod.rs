//! Configuration loading and validation.
//!
//! This module provides YAML-based configuration for the engine. Every
//! setting has a default, so an empty document is a valid configuration.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{
    DEFAULT_KEEP_ALIVE, DEFAULT_PAYLOAD_POOL_CAPACITY, DEFAULT_THREAD_NAME, EngineConfig,
    MAX_CORE_WORKERS, MIN_CORE_WORKERS, PoolConfig,
};
pub use yaml::YamlLoader;
