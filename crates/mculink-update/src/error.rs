use std::time::Duration;

use mculink_channel::ChannelError;

use crate::supervisor::UpdateReport;

/// Problems with a firmware image or bitstream before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageError {
    #[error("image is empty")]
    Empty,

    #[error("image length {len} is not a multiple of the {page_size}-byte page")]
    Misaligned { len: usize, page_size: usize },

    #[error("page size {size} is not usable (expected {expected})")]
    PageSize { size: usize, expected: usize },

    #[error("version prefix is missing its NUL terminator")]
    UnterminatedVersion,

    #[error("version prefix is not valid UTF-8")]
    InvalidVersion,
}

/// Errors from an update attempt or the supervisor running it.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    /// A request on the link failed.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("image error: {0}")]
    Image(#[from] ImageError),

    /// The controller acknowledged a step with a non-success code.
    #[error("{step} rejected by controller (code {code})")]
    Rejected { step: &'static str, code: u8 },

    /// A page acknowledgement was neither success nor the compatibility
    /// code for that address. The transfer is abandoned.
    #[error("page {page} at 0x{address:05X} rejected (code {code})")]
    PageRejected { page: usize, address: u32, code: u8 },

    #[error("controller did not answer from its bootloader")]
    BootloaderNotConfirmed,

    #[error("application did not start after boot request")]
    AppDidNotStart,

    #[error("running version {found:?} after update, expected {expected:?}")]
    VersionMismatch { expected: String, found: String },

    #[error("FPGA still requests configuration after the bitstream was sent")]
    StillUnconfigured,

    #[error("update cancelled")]
    Cancelled,

    #[error("attempt timed out after {0:?}")]
    AttemptTimeout(Duration),

    #[error("update worker panicked")]
    WorkerPanicked,

    #[error("failed to start update worker: {0}")]
    Spawn(#[source] std::io::Error),

    /// Every attempt failed; the report lists them.
    #[error("{} update failed after {} attempts", .0.family, .0.attempts.len())]
    RetriesExhausted(Box<UpdateReport>),
}

impl UpdateError {
    /// Whether the failure came from the link rather than the controller's
    /// answers.
    pub fn is_comms(&self) -> bool {
        matches!(self, Self::Channel(_))
    }

    /// Whether a bounded wait expired.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::AttemptTimeout(_) => true,
            Self::Channel(err) => err.is_timeout(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, UpdateError>;
