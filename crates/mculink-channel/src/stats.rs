use std::sync::atomic::{AtomicU64, Ordering};

use mculink_frame::FrameCounters;
use serde::Serialize;

/// Request-path counters kept by the engine.
#[derive(Debug, Default)]
pub(crate) struct LinkCounters {
    pub requests: AtomicU64,
    pub reply_timeouts: AtomicU64,
    pub tx_timeouts: AtomicU64,
    pub starvations: AtomicU64,
    pub dropped_replies: AtomicU64,
    pub unsolicited: AtomicU64,
    pub forced_releases: AtomicU64,
}

impl LinkCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, frames: FrameCounters) -> LinkStats {
        LinkStats {
            frames,
            requests: self.requests.load(Ordering::Relaxed),
            reply_timeouts: self.reply_timeouts.load(Ordering::Relaxed),
            tx_timeouts: self.tx_timeouts.load(Ordering::Relaxed),
            starvations: self.starvations.load(Ordering::Relaxed),
            dropped_replies: self.dropped_replies.load(Ordering::Relaxed),
            unsolicited: self.unsolicited.load(Ordering::Relaxed),
            forced_releases: self.forced_releases.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of link health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Decode counters from the transport task's parser.
    pub frames: FrameCounters,
    /// Requests that took the channel.
    pub requests: u64,
    pub reply_timeouts: u64,
    pub tx_timeouts: u64,
    /// Lock acquisitions that timed out.
    pub starvations: u64,
    /// Replies dropped because an earlier reply was never consumed.
    pub dropped_replies: u64,
    /// Frames that arrived with no request outstanding.
    pub unsolicited: u64,
    pub forced_releases: u64,
}

impl LinkStats {
    /// Communication errors as reported to operators: corrupt frames plus
    /// requests that got no reply.
    pub fn communication_errors(&self) -> u64 {
        self.frames.total_errors() + self.reply_timeouts + self.tx_timeouts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn communication_errors_sum() {
        let counters = LinkCounters::default();
        LinkCounters::bump(&counters.reply_timeouts);
        LinkCounters::bump(&counters.reply_timeouts);
        LinkCounters::bump(&counters.tx_timeouts);
        LinkCounters::bump(&counters.requests);

        let frames = FrameCounters {
            checksum_errors: 2,
            completed: 5,
            ..FrameCounters::default()
        };
        let stats = counters.snapshot(frames);

        assert_eq!(stats.requests, 1);
        assert_eq!(stats.communication_errors(), 5);
    }
}
