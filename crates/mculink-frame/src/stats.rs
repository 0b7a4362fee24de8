use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::cobs::CobsError;
use crate::error::FrameError;

/// Running decode counters, shared between the parser and observers.
///
/// Counters are observability only; nothing in the link gates on them.
#[derive(Debug, Default)]
pub struct FrameStats {
    framing: AtomicU64,
    length: AtomicU64,
    checksum: AtomicU64,
    unknown_type: AtomicU64,
    completed: AtomicU64,
}

/// Point-in-time copy of [`FrameStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameCounters {
    pub framing_errors: u64,
    pub length_errors: u64,
    pub checksum_errors: u64,
    pub unknown_type: u64,
    pub completed: u64,
}

impl FrameCounters {
    /// Sum of all error counters.
    pub fn total_errors(&self) -> u64 {
        self.framing_errors + self.length_errors + self.checksum_errors + self.unknown_type
    }
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one completed, checksum-valid frame.
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one dropped frame. Errors that do not describe wire
    /// corruption are ignored.
    pub fn record_error(&self, err: &FrameError) {
        let counter = match err {
            FrameError::Framing(_) => &self.framing,
            FrameError::Length { .. } => &self.length,
            FrameError::Checksum { .. } => &self.checksum,
            FrameError::UnknownType(_) => &self.unknown_type,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an overlong run before a delimiter.
    pub(crate) fn record_overflow(&self) {
        self.record_error(&FrameError::Framing(CobsError::Overflow {
            capacity: crate::codec::MAX_STUFFED_FRAME,
        }));
    }

    /// Snapshot all counters.
    pub fn snapshot(&self) -> FrameCounters {
        FrameCounters {
            framing_errors: self.framing.load(Ordering::Relaxed),
            length_errors: self.length.load(Ordering::Relaxed),
            checksum_errors: self.checksum.load(Ordering::Relaxed),
            unknown_type: self.unknown_type.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
        }
    }

    /// Zero all counters.
    pub fn reset(&self) {
        for counter in [
            &self.framing,
            &self.length,
            &self.checksum,
            &self.unknown_type,
            &self.completed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_land_in_their_counter() {
        let stats = FrameStats::new();
        stats.record_error(&FrameError::Framing(CobsError::Truncated { offset: 0 }));
        stats.record_error(&FrameError::Length {
            len: 3,
            expected: 7,
        });
        stats.record_error(&FrameError::Checksum {
            received: 1,
            computed: 2,
        });
        stats.record_error(&FrameError::UnknownType(7));
        stats.record_error(&FrameError::ConnectionClosed);
        stats.record_completed();

        let snap = stats.snapshot();
        assert_eq!(
            snap,
            FrameCounters {
                framing_errors: 1,
                length_errors: 1,
                checksum_errors: 1,
                unknown_type: 1,
                completed: 1,
            }
        );
        assert_eq!(snap.total_errors(), 4);
    }

    #[test]
    fn reset_zeroes_everything() {
        let stats = FrameStats::new();
        stats.record_completed();
        stats.record_overflow();
        stats.reset();
        assert_eq!(stats.snapshot(), FrameCounters::default());
    }
}
