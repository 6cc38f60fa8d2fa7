//! Inference jobs and the handles callers hold on them.

use super::dispatcher::Counters;
use localcoder_core::engine::{AbortSignal, Generation, GenerationParams};
use localcoder_core::error::{DispatchError, TimeoutPhase};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::debug;

/// Monotonic per-dispatcher job number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle: `Queued → Running → {Completed | Failed | Cancelled}`.
///
/// A queued job can also go straight to `Failed` (queue timeout) or
/// `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// What a call to [`JobHandle::cancel`] achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still queued and will never run.
    Cancelled,
    /// The job is running; an abort was requested and a late completion
    /// may still be delivered.
    AbortRequested,
    /// The job had already reached a terminal state.
    AlreadyFinished,
}

/// Successful result of a job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub generation: Generation,
    /// Set when cancellation was requested while the job was running but
    /// the engine finished anyway. Callers should discard the generation.
    pub cancel_requested: bool,
}

pub(crate) type JobResult = Result<Generation, DispatchError>;

/// State shared between a handle and the worker.
pub(crate) struct JobShared {
    pub id: JobId,
    pub prompt: String,
    pub params: GenerationParams,
    pub timeout: Duration,
    pub submitted: Instant,
    pub abort: AbortSignal,
    state: Mutex<JobState>,
    cancel_requested: AtomicBool,
    cancelled_while_queued: Notify,
}

impl JobShared {
    pub fn new(id: JobId, prompt: String, params: GenerationParams, timeout: Duration) -> Self {
        Self {
            id,
            prompt,
            params,
            timeout,
            submitted: Instant::now(),
            abort: AbortSignal::new(),
            state: Mutex::new(JobState::Queued),
            cancel_requested: AtomicBool::new(false),
            cancelled_while_queued: Notify::new(),
        }
    }

    pub fn state(&self) -> JobState {
        *self.lock_state()
    }

    pub fn lock_state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move from `from` to `to` atomically. Returns false if the job was
    /// no longer in `from`.
    pub fn transition(&self, from: JobState, to: JobState) -> bool {
        let mut state = self.lock_state();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    pub fn finish(&self, to: JobState) {
        *self.lock_state() = to;
    }

    pub fn queue_deadline(&self) -> Instant {
        self.submitted + self.timeout
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    fn request_cancel(&self, counters: &Counters) -> CancelOutcome {
        let mut state = self.lock_state();
        match *state {
            JobState::Queued => {
                *state = JobState::Cancelled;
                drop(state);
                self.cancel_requested.store(true, Ordering::SeqCst);
                counters.cancelled.fetch_add(1, Ordering::Relaxed);
                self.cancelled_while_queued.notify_one();
                debug!(job = %self.id, "Cancelled queued job");
                CancelOutcome::Cancelled
            }
            JobState::Running => {
                drop(state);
                self.cancel_requested.store(true, Ordering::SeqCst);
                self.abort.abort();
                debug!(job = %self.id, "Requested abort of running job");
                CancelOutcome::AbortRequested
            }
            _ => CancelOutcome::AlreadyFinished,
        }
    }
}

/// The caller's side of a submitted job.
///
/// Dropping a handle before its result was received cancels the job, so a
/// disconnected client never keeps the engine busy.
pub struct JobHandle {
    shared: Arc<JobShared>,
    counters: Arc<Counters>,
    rx: oneshot::Receiver<JobResult>,
    done: bool,
}

impl JobHandle {
    pub(crate) fn new(
        shared: Arc<JobShared>,
        counters: Arc<Counters>,
        rx: oneshot::Receiver<JobResult>,
    ) -> Self {
        Self {
            shared,
            counters,
            rx,
            done: false,
        }
    }

    pub fn id(&self) -> JobId {
        self.shared.id
    }

    pub fn state(&self) -> JobState {
        self.shared.state()
    }

    pub fn cancel(&self) -> CancelOutcome {
        self.shared.request_cancel(&self.counters)
    }

    /// Wait for the job to reach a terminal state.
    ///
    /// The queue timeout is enforced here as well as in the worker, so a
    /// job stuck behind a long generation fails on time.
    pub async fn wait(&mut self) -> Result<JobOutcome, DispatchError> {
        if self.done {
            return Err(DispatchError::Cancelled);
        }
        let deadline = self.shared.queue_deadline();
        let mut watch_queue = true;

        let result = loop {
            tokio::select! {
                received = &mut self.rx => {
                    break match received {
                        Ok(result) => result,
                        Err(_) if self.shared.state() == JobState::Cancelled => {
                            Err(DispatchError::Cancelled)
                        }
                        Err(_) => Err(DispatchError::Shutdown),
                    };
                }
                _ = tokio::time::sleep_until(deadline), if watch_queue => {
                    if self.shared.transition(JobState::Queued, JobState::Failed) {
                        self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                        debug!(job = %self.shared.id, "Job timed out in queue");
                        break Err(DispatchError::Timeout {
                            phase: TimeoutPhase::Queued,
                            after: self.shared.timeout,
                        });
                    }
                    // Started in time; the worker owns the running deadline.
                    watch_queue = false;
                }
                _ = self.shared.cancelled_while_queued.notified() => {
                    if self.shared.state() == JobState::Cancelled {
                        break Err(DispatchError::Cancelled);
                    }
                }
            }
        };

        self.done = true;
        result.map(|generation| JobOutcome {
            generation,
            cancel_requested: self.shared.cancel_requested(),
        })
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if !self.done && !self.shared.state().is_terminal() {
            self.shared.request_cancel(&self.counters);
        }
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish()
    }
}
