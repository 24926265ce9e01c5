pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod testing;
pub mod traverse;

pub use config::{ConfigError, EngineConfig, PoolConfig, YamlLoader};
pub use core::bundle::{Bundle, JobResult, Progress, Value};
pub use core::job::{Job, JobBody, JobContext, JobHandle};
pub use core::owner::{Liveness, LivenessGuard, Owner};
pub use core::recycle::{Pooled, Recycle, Recycler};
pub use core::types::{JobId, JobState, PoolKind, Priority};
pub use events::{EngineEvent, EventBus, EventHandler};
pub use execution::{
    Engine, EngineStats, FreeListStats, PayloadStats, Payloads, PoolStats, ScheduleError,
};
pub use traverse::{DispatchOutcome, DispatchStats, PayloadKind, TraverseLoop};
