//! Cross-thread delivery of progress and results ("traverse").
//!
//! Worker threads publish payloads through a [`Traverse`] sender; a single
//! [`TraverseLoop`] bound to the consumer context receives them in order,
//! resolves each job's owner and invokes the job's translators.
//!
//! For one job every progress delivery precedes its result delivery, in
//! publication order: a job publishes from one worker thread and the
//! channel is FIFO per sender.

mod channel;
mod consumer;

pub(crate) use channel::{Payload, Traverse};
pub use channel::{DispatchOutcome, DispatchStats, PayloadKind};
pub use consumer::TraverseLoop;
