use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mculink_channel::ProtocolEngine;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{Result, UpdateError};
use crate::procedure::{AttemptContext, CancelToken, UpdateOutcome, UpdateProcedure};

const REAP_POLL: Duration = Duration::from_millis(10);

/// Retry and pacing knobs for an update run.
#[derive(Debug, Clone)]
pub struct UpdatePolicy {
    /// Whole-sequence attempts before giving up. Default: 5.
    pub max_attempts: u32,
    /// Upper bound on one attempt. Default: 10 min.
    pub attempt_timeout: Duration,
    /// Delay before retry `n` is `backoff_step * n`. Default: 5 s.
    pub backoff_step: Duration,
    /// How long a cancelled worker may take to notice. Default: 2 s.
    pub join_grace: Duration,
    /// Wait between bootloader/application readiness probes. Default: 500 ms.
    pub boot_delay: Duration,
    /// Readiness probes after a mode switch. Default: 10.
    pub bootloader_confirm_tries: u32,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            attempt_timeout: Duration::from_secs(600),
            backoff_step: Duration::from_secs(5),
            join_grace: Duration::from_secs(2),
            boot_delay: Duration::from_millis(500),
            bootloader_confirm_tries: 10,
        }
    }
}

impl UpdatePolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    /// The link failed under the worker.
    CommsError,
    /// The attempt or one of its requests ran out of time.
    Timeout,
    /// The controller refused a step or verification failed.
    Rejected,
    Cancelled,
}

impl AttemptOutcome {
    fn of(result: &Result<UpdateOutcome>) -> Self {
        match result {
            Ok(_) => Self::Success,
            Err(err) if err.is_timeout() => Self::Timeout,
            Err(err) if err.is_comms() => Self::CommsError,
            Err(UpdateError::Cancelled) => Self::Cancelled,
            Err(_) => Self::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub elapsed_ms: u64,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of a supervised run.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub family: &'static str,
    pub outcome: UpdateOutcome,
    pub attempts: Vec<AttemptRecord>,
}

/// Runs an [`UpdateProcedure`] on a worker thread, bounding and retrying
/// each attempt.
///
/// Each attempt gets a fresh worker; its result comes back over a channel.
/// On timeout the worker is cancelled and left to wind down. After every
/// attempt the request channel is force-released in case the worker died
/// holding it. Only after the last attempt fails is an error returned.
pub struct Supervisor<P> {
    procedure: Arc<P>,
    engine: ProtocolEngine,
    policy: UpdatePolicy,
    abort: CancelToken,
}

impl<P: UpdateProcedure> Supervisor<P> {
    pub fn new(procedure: P, engine: ProtocolEngine) -> Self {
        Self::with_policy(procedure, engine, UpdatePolicy::default())
    }

    pub fn with_policy(procedure: P, engine: ProtocolEngine, policy: UpdatePolicy) -> Self {
        Self {
            procedure: Arc::new(procedure),
            engine,
            policy,
            abort: CancelToken::new(),
        }
    }

    /// Token that stops the whole run when cancelled (e.g. from Ctrl-C).
    pub fn abort_token(&self) -> CancelToken {
        self.abort.clone()
    }

    pub fn policy(&self) -> &UpdatePolicy {
        &self.policy
    }

    /// Run attempts until one succeeds or the budget is spent.
    pub fn run(&self) -> Result<UpdateReport> {
        let family = self.procedure.family();
        let mut attempts = Vec::new();
        info!(family, max_attempts = self.policy.max_attempts, "starting update");

        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                let delay = self.policy.backoff(attempt - 1);
                info!(family, attempt, delay = ?delay, "retrying after back-off");
                self.sleep_unless_aborted(delay);
            }
            if self.abort.is_cancelled() {
                warn!(family, "update aborted");
                return Err(UpdateError::Cancelled);
            }

            let started = Instant::now();
            let result = self.run_attempt(attempt);
            if self.engine.force_release() {
                warn!(family, attempt, "request channel was still held after attempt");
            }

            attempts.push(AttemptRecord {
                attempt,
                elapsed_ms: started.elapsed().as_millis() as u64,
                outcome: AttemptOutcome::of(&result),
                error: result.as_ref().err().map(ToString::to_string),
            });

            match result {
                Ok(outcome) => {
                    info!(family, attempt, outcome = ?outcome, "update finished");
                    return Ok(UpdateReport {
                        family,
                        outcome,
                        attempts,
                    });
                }
                Err(err) => warn!(family, attempt, error = %err, "update attempt failed"),
            }
        }

        error!(family, attempts = attempts.len(), "update failed, retries exhausted");
        Err(UpdateError::RetriesExhausted(Box::new(UpdateReport {
            family,
            outcome: UpdateOutcome::Failed,
            attempts,
        })))
    }

    fn run_attempt(&self, attempt: u32) -> Result<UpdateOutcome> {
        let cancel = self.abort.child();
        let (tx, rx) = mpsc::channel();

        let worker = {
            let procedure = Arc::clone(&self.procedure);
            let engine = self.engine.clone();
            let policy = self.policy.clone();
            let cancel = cancel.clone();
            thread::Builder::new()
                .name(format!("mcu-update-{attempt}"))
                .spawn(move || {
                    let ctx = AttemptContext {
                        engine: &engine,
                        cancel: &cancel,
                        policy: &policy,
                        attempt,
                    };
                    let _ = tx.send(procedure.run(&ctx));
                })
                .map_err(UpdateError::Spawn)?
        };
        debug!(attempt, "update worker started");

        match rx.recv_timeout(self.policy.attempt_timeout) {
            Ok(result) => {
                let _ = worker.join();
                result
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.join();
                error!(attempt, "update worker died without a result");
                Err(UpdateError::WorkerPanicked)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(attempt, timeout = ?self.policy.attempt_timeout, "attempt timed out, cancelling worker");
                cancel.cancel();
                self.engine.force_release();
                self.reap(worker);
                Err(UpdateError::AttemptTimeout(self.policy.attempt_timeout))
            }
        }
    }

    /// Give a cancelled worker `join_grace` to exit, then detach it.
    fn reap(&self, worker: JoinHandle<()>) {
        let deadline = Instant::now() + self.policy.join_grace;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                warn!("update worker did not stop in time, detaching it");
                return;
            }
            thread::sleep(REAP_POLL);
        }
        let _ = worker.join();
    }

    fn sleep_unless_aborted(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.abort.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(REAP_POLL));
        }
    }
}
