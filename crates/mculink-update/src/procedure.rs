use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use mculink_channel::ProtocolEngine;
use serde::Serialize;

use crate::error::{Result, UpdateError};
use crate::supervisor::UpdatePolicy;

const PAUSE_SLICE: Duration = Duration::from_millis(20);

/// Cooperative cancellation shared between a supervisor and its worker.
///
/// A token created with [`CancelToken::child`] is also cancelled when its
/// parent is.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    own: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token cancelled by either itself or `self`.
    pub fn child(&self) -> Self {
        Self {
            own: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::clone(&self.own)),
        }
    }

    pub fn cancel(&self) {
        self.own.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.own.load(Ordering::Acquire)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.load(Ordering::Acquire))
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// New firmware was written and verified.
    Updated,
    /// The running firmware already matches the image.
    AlreadyCurrent,
    /// The hardware needs no image of this kind.
    NotRequired,
    /// Every attempt failed.
    Failed,
}

/// What a worker gets for one attempt.
pub struct AttemptContext<'a> {
    pub engine: &'a ProtocolEngine,
    pub cancel: &'a CancelToken,
    pub policy: &'a UpdatePolicy,
    /// 1-based attempt index.
    pub attempt: u32,
}

impl AttemptContext<'_> {
    /// Bail out if the supervisor gave up on this attempt. Called before
    /// every request.
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(UpdateError::Cancelled);
        }
        Ok(())
    }

    /// Sleep for `duration`, waking early on cancellation.
    pub fn pause(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(PAUSE_SLICE));
        }
    }
}

/// One controller family's update sequence.
///
/// `run` executes a complete attempt from mode detection to verification.
/// It must not resume a previous attempt: every call starts over.
pub trait UpdateProcedure: Send + Sync + 'static {
    /// Short family name for logs and reports.
    fn family(&self) -> &'static str;

    fn run(&self, ctx: &AttemptContext<'_>) -> Result<UpdateOutcome>;
}
