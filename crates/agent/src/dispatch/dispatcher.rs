//! Single-flight inference dispatcher.
//!
//! One worker task owns the engine and pulls jobs off an unbounded FIFO
//! queue, so at most one generation runs at any time and jobs start in
//! submission order. Every [`Dispatcher`] clone shares the same queue; when
//! the last clone is dropped the queue closes and the worker exits after
//! finishing what was already submitted.
//!
//! ```text
//!  submit() ──▶ mpsc queue ──▶ worker ──▶ engine.generate()
//!     │                          │
//!     └── JobHandle ◀── oneshot ─┘
//! ```

use super::job::{JobHandle, JobId, JobResult, JobShared, JobState};
use localcoder_core::engine::{Generation, GenerationParams, InferenceEngine};
use localcoder_core::error::{DispatchError, EngineError, TimeoutPhase};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Point-in-time dispatcher counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub model_id: String,
    pub queue_depth: usize,
    pub submitted: u64,
    pub completed: u64,
    /// Jobs that failed with an engine error after all retries.
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub engine_resets: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub queue_depth: AtomicUsize,
    pub submitted: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub timed_out: AtomicU64,
    pub cancelled: AtomicU64,
    pub engine_resets: AtomicU64,
}

struct QueuedJob {
    shared: Arc<JobShared>,
    reply: oneshot::Sender<JobResult>,
}

#[derive(Clone)]
pub struct Dispatcher {
    queue: mpsc::UnboundedSender<QueuedJob>,
    counters: Arc<Counters>,
    next_id: Arc<AtomicU64>,
    model_id: Arc<str>,
}

impl Dispatcher {
    /// Start the worker. Must be called inside a tokio runtime.
    ///
    /// `engine_retries` is how many times a failed generation is retried
    /// (after an engine reset) before the job fails.
    pub fn spawn(engine: Box<dyn InferenceEngine>, engine_retries: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let model_id: Arc<str> = Arc::from(engine.model_id());

        let worker = Worker {
            engine,
            counters: counters.clone(),
            engine_retries,
        };
        tokio::spawn(worker.run(rx));
        info!(model = %model_id, engine_retries, "Inference dispatcher started");

        Self {
            queue: tx,
            counters,
            next_id: Arc::new(AtomicU64::new(1)),
            model_id,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Whether the worker is still accepting jobs.
    pub fn is_running(&self) -> bool {
        !self.queue.is_closed()
    }

    /// Enqueue a generation. `timeout` bounds both the time spent queued
    /// (measured from now) and the time spent running (measured from start).
    pub fn submit(
        &self,
        prompt: impl Into<String>,
        params: GenerationParams,
        timeout: Duration,
    ) -> Result<JobHandle, DispatchError> {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let shared = Arc::new(JobShared::new(id, prompt.into(), params, timeout));
        let (reply, rx) = oneshot::channel();

        self.counters.queue_depth.fetch_add(1, Ordering::SeqCst);
        if self
            .queue
            .send(QueuedJob {
                shared: shared.clone(),
                reply,
            })
            .is_err()
        {
            self.counters.queue_depth.fetch_sub(1, Ordering::SeqCst);
            return Err(DispatchError::Shutdown);
        }
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(job = %id, timeout_secs = timeout.as_secs_f64(), "Job submitted");

        Ok(JobHandle::new(shared, self.counters.clone(), rx))
    }

    pub fn stats(&self) -> DispatcherStats {
        let c = &self.counters;
        DispatcherStats {
            model_id: self.model_id.to_string(),
            queue_depth: c.queue_depth.load(Ordering::SeqCst),
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            cancelled: c.cancelled.load(Ordering::Relaxed),
            engine_resets: c.engine_resets.load(Ordering::Relaxed),
        }
    }
}

// ── Worker ────────────────────────────────────────────────────────────────

struct Worker {
    engine: Box<dyn InferenceEngine>,
    counters: Arc<Counters>,
    engine_retries: u32,
}

impl Worker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<QueuedJob>) {
        while let Some(QueuedJob { shared, reply }) = rx.recv().await {
            self.counters.queue_depth.fetch_sub(1, Ordering::SeqCst);

            let started = Instant::now();
            let admitted = {
                let mut state = shared.lock_state();
                match *state {
                    JobState::Queued if started >= shared.queue_deadline() => {
                        *state = JobState::Failed;
                        None
                    }
                    JobState::Queued => {
                        *state = JobState::Running;
                        Some(true)
                    }
                    // Cancelled or timed out by its handle while queued.
                    _ => Some(false),
                }
            };

            match admitted {
                None => {
                    self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
                    debug!(job = %shared.id, "Job expired before it could start");
                    let _ = reply.send(Err(DispatchError::Timeout {
                        phase: TimeoutPhase::Queued,
                        after: shared.timeout,
                    }));
                }
                Some(false) => {
                    debug!(job = %shared.id, state = ?shared.state(), "Skipping finished job");
                }
                Some(true) => {
                    let result = self.execute(&shared, started + shared.timeout).await;
                    self.settle(&shared, &result);
                    // The handle may be gone; nobody is left to tell.
                    let _ = reply.send(result);
                }
            }
        }
        info!("Inference dispatcher stopped");
    }

    async fn execute(&self, job: &JobShared, deadline: Instant) -> JobResult {
        debug!(job = %job.id, prompt_chars = job.prompt.len(), "Job started");
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let generation = tokio::time::timeout_at(
                deadline,
                self.engine.generate(&job.prompt, &job.params, job.abort.clone()),
            )
            .await;

            match generation {
                Ok(Ok(generation)) => return Ok(generation),
                Err(_) => {
                    warn!(job = %job.id, timeout_secs = job.timeout.as_secs_f64(), "Generation timed out");
                    job.abort.abort();
                    self.reset_engine().await;
                    return Err(DispatchError::Timeout {
                        phase: TimeoutPhase::Running,
                        after: job.timeout,
                    });
                }
                Ok(Err(EngineError::Aborted)) if job.cancel_requested() => {
                    self.reset_engine().await;
                    return Err(DispatchError::Cancelled);
                }
                Ok(Err(e)) if attempts > self.engine_retries => {
                    error!(job = %job.id, attempts, error = %e, "Generation failed");
                    return Err(DispatchError::Engine {
                        attempts,
                        source: e,
                    });
                }
                Ok(Err(e)) => {
                    warn!(job = %job.id, attempt = attempts, error = %e, "Generation failed, resetting engine and retrying");
                    match tokio::time::timeout_at(deadline, self.engine.reset()).await {
                        Ok(Ok(())) => {
                            self.counters.engine_resets.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(Err(reset_err)) => {
                            error!(job = %job.id, error = %reset_err, "Engine reset failed");
                            return Err(DispatchError::Engine {
                                attempts,
                                source: reset_err,
                            });
                        }
                        Err(_) => {
                            return Err(DispatchError::Timeout {
                                phase: TimeoutPhase::Running,
                                after: job.timeout,
                            });
                        }
                    }
                }
            }
        }
    }

    /// Record the terminal state and bump the matching counter.
    fn settle(&self, job: &JobShared, result: &JobResult) {
        let (state, counter) = match result {
            Ok(Generation { usage, .. }) => {
                debug!(job = %job.id, completion_tokens = usage.completion_tokens, "Job completed");
                (JobState::Completed, &self.counters.completed)
            }
            Err(DispatchError::Cancelled) => (JobState::Cancelled, &self.counters.cancelled),
            Err(DispatchError::Timeout { .. }) => (JobState::Failed, &self.counters.timed_out),
            Err(_) => (JobState::Failed, &self.counters.failed),
        };
        job.finish(state);
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Bring the engine back to a clean state before the next job.
    async fn reset_engine(&self) {
        match self.engine.reset().await {
            Ok(()) => {
                self.counters.engine_resets.fetch_add(1, Ordering::Relaxed);
                debug!("Engine reset");
            }
            Err(e) => error!(error = %e, "Engine reset failed"),
        }
    }
}
