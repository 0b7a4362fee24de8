use std::time::Duration;

use mculink_frame::MessageType;

/// Errors that can occur on the request channel and parameter API.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] mculink_transport::TransportError),

    /// Frame-level error (encode failure or link I/O).
    #[error("frame error: {0}")]
    Frame(#[from] mculink_frame::FrameError),

    /// The transport task could not be started.
    #[error("failed to start transport task: {0}")]
    Spawn(#[source] std::io::Error),

    /// The channel could not be taken within the lock timeout. No hold is
    /// taken; there is nothing to release.
    #[error("request channel starved (not acquired within {0:?})")]
    Starvation(Duration),

    /// The request did not leave the host within the TX timeout.
    #[error("request transmit timed out after {0:?}")]
    TxTimeout(Duration),

    /// No reply arrived within the reply timeout.
    #[error("no reply within {0:?}")]
    ReplyTimeout(Duration),

    /// A reply of the wrong category arrived.
    #[error("expected {expected} reply for id {identifier}, got {got}")]
    UnexpectedReply {
        expected: MessageType,
        got: MessageType,
        identifier: u16,
    },

    /// The reply echoed a different identifier than the request.
    #[error("reply desync: sent id {sent}, reply carries id {received}")]
    Desync { sent: u16, received: u16 },

    /// The reply payload does not decode as the requested type.
    #[error("reply for id {identifier} does not decode as {expected} ({len} bytes)")]
    Decode {
        identifier: u16,
        expected: &'static str,
        len: usize,
    },

    /// The transport task has stopped; the link is gone.
    #[error("link closed")]
    Closed,
}

impl ChannelError {
    /// Whether this error is one of the bounded waits expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Starvation(_) | Self::TxTimeout(_) | Self::ReplyTimeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
