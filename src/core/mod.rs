//! Core job types.
//!
//! Identifiers and priorities, the integer-keyed payload containers, the
//! recycling free lists behind them, owner references and the job
//! descriptor itself.

pub mod bundle;
pub mod job;
pub mod owner;
pub mod recycle;
pub mod types;
