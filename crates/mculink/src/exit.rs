use std::fmt;
use std::io;

use mculink_channel::ChannelError;
use mculink_frame::FrameError;
use mculink_transport::TransportError;
use mculink_update::UpdateError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Io(source) => io_error(context, source),
        TransportError::Open { ref source, .. }
            if source.kind() == serialport::ErrorKind::Io(io::ErrorKind::PermissionDenied) =>
        {
            CliError::new(PERMISSION_DENIED, format!("{context}: {err}"))
        }
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::PayloadTooLarge { .. } | FrameError::PayloadShape { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn channel_error(context: &str, err: ChannelError) -> CliError {
    match err {
        ChannelError::Transport(err) => transport_error(context, err),
        ChannelError::Frame(err) => frame_error(context, err),
        err if err.is_timeout() => CliError::new(TIMEOUT, format!("{context}: {err}")),
        err @ (ChannelError::UnexpectedReply { .. }
        | ChannelError::Desync { .. }
        | ChannelError::Decode { .. }) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        err @ ChannelError::Closed => CliError::new(FAILURE, format!("{context}: {err}")),
        other => CliError::new(INTERNAL, format!("{context}: {other}")),
    }
}

pub fn update_error(context: &str, err: UpdateError) -> CliError {
    match err {
        UpdateError::Channel(err) => channel_error(context, err),
        err @ UpdateError::Image(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        err @ (UpdateError::Spawn(_) | UpdateError::WorkerPanicked) => {
            CliError::new(INTERNAL, format!("{context}: {err}"))
        }
        err if err.is_timeout() => CliError::new(TIMEOUT, format!("{context}: {err}")),
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mculink_frame::MessageType;

    use super::*;

    #[test]
    fn channel_timeouts_map_to_timeout() {
        let err = channel_error("read", ChannelError::ReplyTimeout(Duration::from_secs(1)));
        assert_eq!(err.code, TIMEOUT);
        let err = channel_error("read", ChannelError::Starvation(Duration::from_secs(3)));
        assert_eq!(err.code, TIMEOUT);
    }

    #[test]
    fn bad_replies_map_to_data_invalid() {
        let err = channel_error("read", ChannelError::Desync { sent: 1, received: 2 });
        assert_eq!(err.code, DATA_INVALID);
        let err = channel_error(
            "read",
            ChannelError::UnexpectedReply {
                expected: MessageType::ReadAck,
                got: MessageType::FirmwareAck,
                identifier: 0,
            },
        );
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.starts_with("read: "));
    }

    #[test]
    fn update_errors_unwrap_channel_errors() {
        let err = update_error(
            "flash",
            UpdateError::Channel(ChannelError::TxTimeout(Duration::from_millis(500))),
        );
        assert_eq!(err.code, TIMEOUT);
        assert_eq!(update_error("flash", UpdateError::StillUnconfigured).code, FAILURE);
    }
}
