//! Inference dispatch: a FIFO queue in front of the one engine.

pub mod dispatcher;
pub mod job;

pub use dispatcher::{Dispatcher, DispatcherStats};
pub use job::{CancelOutcome, JobHandle, JobId, JobOutcome, JobState};
